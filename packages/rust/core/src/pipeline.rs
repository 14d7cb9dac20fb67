//! End-to-end exposé pipeline: PDF → text → key facts → CRM list → members
//! → curation → email.
//!
//! [`Pipeline::run`] drives one task through every stage, reporting progress
//! to the [`TaskStore`] after each, and always leaves the task finished:
//! with the full result on success, or with an `Error:` status and an
//! all-default result on any failure, panic or deadline expiry.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use exposecast_crm::CrmGateway;
use exposecast_document::TextExtractor;
use exposecast_llm::{TextModel, prompts, strip_code_fences};
use exposecast_shared::{
    CompanyRecord, ContactRecord, ExposecastError, ListDescriptor, PipelineConfig, Progress,
    Result, TaskId, TaskResult,
};
use exposecast_storage::TaskStore;

use crate::curation::{curate_top_entities, split_bracketed};
use crate::facts::extract_facts;

/// Status of a successfully finished task.
pub const STATUS_COMPLETE: &str = "Complete";

/// The collaborators and limits one pipeline run needs.
///
/// Cloning is cheap; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct Pipeline {
    model: Arc<dyn TextModel>,
    crm: Arc<dyn CrmGateway>,
    extractor: Arc<dyn TextExtractor>,
    store: Arc<TaskStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn TextModel>,
        crm: Arc<dyn CrmGateway>,
        extractor: Arc<dyn TextExtractor>,
        store: Arc<TaskStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            model,
            crm,
            extractor,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for `task_id` on `document` until the task is finished.
    ///
    /// Never fails and never panics past this boundary.
    #[instrument(skip_all, fields(task_id = %task_id, bytes = document.len()))]
    pub async fn run(&self, task_id: TaskId, document: Vec<u8>) {
        let start = Instant::now();
        let deadline = self.config.deadline();

        let pipeline = self.clone();
        let id = task_id.clone();
        let mut work = tokio::spawn(async move { pipeline.execute(&id, document).await });

        let failure = match tokio::time::timeout(deadline, &mut work).await {
            Ok(Ok(Ok(result))) => {
                self.store.finish(&task_id, STATUS_COMPLETE, result);
                info!(elapsed_ms = start.elapsed().as_millis() as u64, "pipeline complete");
                return;
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join_error)) => format!("pipeline aborted: {join_error}"),
            Err(_) => {
                work.abort();
                ExposecastError::Timeout("pipeline".into()).to_string()
            }
        };

        error!(
            error = %failure,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pipeline failed"
        );
        self.store
            .finish(&task_id, Progress::failed(failure).status, TaskResult::default());
    }

    async fn execute(&self, task_id: &TaskId, document: Vec<u8>) -> Result<TaskResult> {
        // --- S0: document text ---
        self.report(task_id, "Extracting text from PDF ...", 10);
        let text = self.extract_text(document).await?;

        // --- S1: key facts ---
        self.report(task_id, "Extracting key facts ...", 20);
        let key_facts = extract_facts(self.model.as_ref(), &text).await;

        // --- S2: list selection ---
        self.report(task_id, "Fetching all lists from CRM ...", 40);
        let lists = self.crm.list_all().await?;

        self.report(task_id, "Selecting the target list ...", 60);
        let (selected_list, selected_list_id) = self.select_list(&text, &lists).await;

        // --- S3: members ---
        self.report(task_id, "Getting details of list members from CRM ...", 70);
        let (contacts, companies) = match &selected_list_id {
            Some(list_id) => self.fetch_members(list_id).await?,
            None => {
                warn!(%selected_list, "selected list matches no CRM list, skipping members");
                (Vec::new(), Vec::new())
            }
        };

        // --- S4: curation ---
        // Members without a usable name never reach the model.
        let entities = [
            join_names(contacts.iter().map(ContactRecord::full_name)),
            join_names(companies.iter().map(|c| c.name.trim().to_string())),
        ]
        .into_iter()
        .find(|names| !names.is_empty());

        let curated_member = match entities {
            Some(entities) => {
                let limit = self.config.curation_limit;
                self.report(task_id, format!("Curating top {limit} performers ..."), 80);
                let curated = curate_top_entities(
                    self.model.as_ref(),
                    &entities,
                    limit,
                    self.config.curation_attempts,
                )
                .await;
                split_bracketed(&curated)
            }
            None => {
                debug!("no named list members, skipping curation");
                Vec::new()
            }
        };

        // --- S5: email ---
        self.report(task_id, "Generating email ...", 90);
        let email = self.generate_email(&text, &selected_list).await;

        Ok(TaskResult {
            key_facts,
            selected_list,
            selected_list_id,
            selected_contacts: contacts,
            selected_companies: companies,
            curated_member,
            email,
        })
    }

    fn report(&self, task_id: &TaskId, status: impl Into<String>, percent: u8) {
        let status = status.into();
        info!(percent, %status, "pipeline stage");
        self.store.update_progress(task_id, status, percent);
    }

    async fn extract_text(&self, document: Vec<u8>) -> Result<String> {
        let extractor = Arc::clone(&self.extractor);
        let text = tokio::task::spawn_blocking(move || extractor.extract_text(&document))
            .await
            .map_err(|e| ExposecastError::Document(format!("text extraction aborted: {e}")))??;

        if text.trim().is_empty() {
            return Err(ExposecastError::Document(
                "failed to extract text from PDF".into(),
            ));
        }
        Ok(text)
    }

    /// Let the model pick a list by name; resolve its id by trimmed,
    /// case-insensitive name match.
    async fn select_list(&self, text: &str, lists: &[ListDescriptor]) -> (String, Option<String>) {
        if lists.is_empty() {
            warn!("CRM returned no lists, skipping list selection");
            return (String::new(), None);
        }

        let names: Vec<&str> = lists.iter().map(|l| l.name.as_str()).collect();
        let prompt = prompts::list_selection(text, &names);
        let answer = self.model.complete(&prompt.system, &prompt.user).await;
        let answer = answer.trim().to_string();

        let wanted = answer.to_lowercase();
        let list_id = lists
            .iter()
            .find(|l| l.name.trim().to_lowercase() == wanted)
            .map(|l| l.list_id.clone());

        info!(selected = %answer, list_id = ?list_id, "list selected");
        (answer, list_id)
    }

    async fn fetch_members(
        &self,
        list_id: &str,
    ) -> Result<(Vec<ContactRecord>, Vec<CompanyRecord>)> {
        let member_ids = self.crm.members_of(list_id).await?;
        let contacts = self.crm.contact_details(&member_ids).await?;
        let companies = self.crm.company_details(&member_ids).await?;

        info!(
            %list_id,
            members = member_ids.len(),
            contacts = contacts.len(),
            companies = companies.len(),
            "fetched list members"
        );
        Ok((contacts, companies))
    }

    async fn generate_email(&self, text: &str, list_name: &str) -> String {
        let prompt = prompts::email(text, list_name);
        let raw = self.model.complete(&prompt.system, &prompt.user).await;
        strip_code_fences(&raw).to_string()
    }
}

fn join_names(names: impl Iterator<Item = String>) -> String {
    names
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use exposecast_shared::{ERROR_PREFIX, KeyFacts};

    use crate::testing::{ScriptedModel, StubCrm, StubExtractor};

    const EXPOSE: &str = "Mehrfamilienhaus, Hauptstraße 12, 10115 Berlin. Kaufpreis 2.100.000 €.";

    const FACTS: &str = r#"{"address": {"street": "Hauptstraße", "house_number": "12", "postal_code": "10115", "city": "Berlin"}, "purchase_price": "2.100.000 €"}"#;

    const EMAIL: &str = "```html\n<div class=\"card\"><p>Sehr geehrte Investoren 🏡</p></div>\n```";

    fn investors_crm() -> StubCrm {
        StubCrm::default()
            .with_list("Family Offices", "11", &["901"])
            .with_list("Investors", "12", &["101", "102", "103"])
            .with_contact("101", "Erika", "Mustermann")
            .with_contact("102", "Max", "Muster")
            .with_contact("103", "Anna", "Schmidt")
    }

    fn pipeline(model: ScriptedModel, crm: StubCrm, extractor: StubExtractor) -> Pipeline {
        Pipeline::new(
            Arc::new(model),
            Arc::new(crm),
            Arc::new(extractor),
            Arc::new(TaskStore::new()),
            PipelineConfig::default(),
        )
    }

    async fn run_to_end(pipeline: &Pipeline) -> TaskId {
        let task_id = pipeline.store().create();
        pipeline.run(task_id.clone(), b"%PDF-1.4".to_vec()).await;
        task_id
    }

    #[tokio::test]
    async fn complete_run_populates_every_field() {
        let model = ScriptedModel::new([
            FACTS,
            "  investors ",
            "Erika Mustermann, Anna Schmidt, Max Muster",
            EMAIL,
        ]);
        let pipeline = pipeline(model, investors_crm(), StubExtractor::text(EXPOSE));
        let task_id = run_to_end(&pipeline).await;

        let progress = pipeline.store().get_progress(&task_id);
        assert_eq!(progress, Progress::new(STATUS_COMPLETE, 100));

        let result = pipeline.store().get_result(&task_id);
        assert_eq!(result.key_facts.address.city, Some("Berlin".into()));
        assert_eq!(result.key_facts.purchase_price, Some("2.100.000 €".into()));
        assert_eq!(result.selected_list, "investors");
        assert_eq!(result.selected_list_id.as_deref(), Some("12"));
        assert_eq!(result.selected_contacts.len(), 3);
        assert!(result.selected_companies.is_empty());
        assert_eq!(
            result.curated_member,
            vec!["Erika Mustermann", "Anna Schmidt", "Max Muster"]
        );
        assert!(result.curated_member.len() <= 25);
        assert_eq!(
            result.email,
            "<div class=\"card\"><p>Sehr geehrte Investoren 🏡</p></div>"
        );
    }

    #[tokio::test]
    async fn curation_uses_contact_full_names() {
        let model = Arc::new(ScriptedModel::new([FACTS, "Investors", "Erika Mustermann", EMAIL]));
        let pipeline = Pipeline::new(
            model.clone(),
            Arc::new(investors_crm()),
            Arc::new(StubExtractor::text(EXPOSE)),
            Arc::new(TaskStore::new()),
            PipelineConfig::default(),
        );
        run_to_end(&pipeline).await;

        let prompts = model.user_prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[1].contains("Available lists: Family Offices, Investors"));
        assert!(prompts[2].contains("Erika Mustermann; Max Muster; Anna Schmidt"));
        assert!(prompts[3].contains("List name: Investors"));
    }

    #[tokio::test]
    async fn crm_transport_failure_fails_the_task() {
        let crm = StubCrm {
            fail_lists: true,
            ..investors_crm()
        };
        let model = ScriptedModel::new([FACTS, "Investors", "Erika Mustermann", EMAIL]);
        let pipeline = pipeline(model, crm, StubExtractor::text(EXPOSE));
        let task_id = run_to_end(&pipeline).await;

        let progress = pipeline.store().get_progress(&task_id);
        assert_eq!(progress.percent, 100);
        assert!(progress.status.starts_with(ERROR_PREFIX), "{}", progress.status);
        assert!(progress.status.contains("connection refused"));
        assert_eq!(pipeline.store().get_result(&task_id), TaskResult::default());
    }

    #[tokio::test]
    async fn empty_fact_output_does_not_abort() {
        let model = ScriptedModel::new(["", "Investors", "Erika Mustermann, Max Muster", EMAIL]);
        let pipeline = pipeline(model, investors_crm(), StubExtractor::text(EXPOSE));
        let task_id = run_to_end(&pipeline).await;

        assert_eq!(pipeline.store().get_progress(&task_id).status, STATUS_COMPLETE);
        let result = pipeline.store().get_result(&task_id);
        assert_eq!(result.key_facts, KeyFacts::default());
        assert_eq!(result.selected_contacts.len(), 3);
        assert!(!result.email.is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_fails_the_task() {
        let model = ScriptedModel::new([FACTS]);
        let pipeline = pipeline(model, investors_crm(), StubExtractor(None));
        let task_id = run_to_end(&pipeline).await;

        let progress = pipeline.store().get_progress(&task_id);
        assert_eq!(progress.percent, 100);
        assert!(progress.status.starts_with("Error: document error"));
    }

    #[tokio::test]
    async fn unmatched_list_skips_members_and_curation() {
        let model = ScriptedModel::new([FACTS, "Developers", EMAIL]);
        let pipeline = pipeline(model, investors_crm(), StubExtractor::text(EXPOSE));
        let task_id = run_to_end(&pipeline).await;

        let result = pipeline.store().get_result(&task_id);
        assert_eq!(result.selected_list, "Developers");
        assert!(result.selected_list_id.is_none());
        assert!(result.selected_contacts.is_empty());
        assert!(result.curated_member.is_empty());
        assert!(result.email.contains("card"));
    }

    #[tokio::test]
    async fn companies_are_curated_without_contacts() {
        let crm = StubCrm::default()
            .with_list("Developers", "7", &["501", "502"])
            .with_company("501", "Acme Projektentwicklung GmbH")
            .with_company("502", "Beta Bau AG");
        let model = Arc::new(ScriptedModel::new([
            FACTS,
            "Developers",
            "Beta Bau AG, Acme Projektentwicklung GmbH",
            EMAIL,
        ]));
        let pipeline = Pipeline::new(
            model.clone(),
            Arc::new(crm),
            Arc::new(StubExtractor::text(EXPOSE)),
            Arc::new(TaskStore::new()),
            PipelineConfig::default(),
        );
        let task_id = run_to_end(&pipeline).await;

        let result = pipeline.store().get_result(&task_id);
        assert_eq!(result.selected_companies.len(), 2);
        assert_eq!(
            result.curated_member,
            vec!["Beta Bau AG", "Acme Projektentwicklung GmbH"]
        );
        assert!(model.user_prompts()[2].contains("Acme Projektentwicklung GmbH; Beta Bau AG"));
    }

    #[tokio::test]
    async fn nameless_contacts_fall_back_to_company_names() {
        let crm = StubCrm::default()
            .with_list("Developers", "7", &["101", "501"])
            .with_contact("101", "", "  ")
            .with_company("501", "Acme Projektentwicklung GmbH");
        let model = Arc::new(ScriptedModel::new([
            FACTS,
            "Developers",
            "Acme Projektentwicklung GmbH",
            EMAIL,
        ]));
        let pipeline = Pipeline::new(
            model.clone(),
            Arc::new(crm),
            Arc::new(StubExtractor::text(EXPOSE)),
            Arc::new(TaskStore::new()),
            PipelineConfig::default(),
        );
        let task_id = run_to_end(&pipeline).await;

        let result = pipeline.store().get_result(&task_id);
        assert_eq!(result.selected_contacts.len(), 1);
        assert_eq!(result.curated_member, vec!["Acme Projektentwicklung GmbH"]);
        let prompts = model.user_prompts();
        assert!(prompts[2].contains("Entries: Acme Projektentwicklung GmbH\n"));
    }

    #[tokio::test]
    async fn nameless_members_skip_curation() {
        let crm = StubCrm::default()
            .with_list("Investors", "12", &["101", "501"])
            .with_contact("101", "", "")
            .with_company("501", " ");
        let model = Arc::new(ScriptedModel::new([FACTS, "Investors", EMAIL, "Invented Holding GmbH"]));
        let pipeline = Pipeline::new(
            model.clone(),
            Arc::new(crm),
            Arc::new(StubExtractor::text(EXPOSE)),
            Arc::new(TaskStore::new()),
            PipelineConfig::default(),
        );
        let task_id = run_to_end(&pipeline).await;

        let result = pipeline.store().get_result(&task_id);
        assert!(result.curated_member.is_empty());
        assert!(result.email.contains("card"));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn failed_curation_records_sentinel_entry() {
        let model = ScriptedModel::new([FACTS, "Investors", "[bad], <worse>", "[bad]", "[bad]", EMAIL]);
        let pipeline = pipeline(model, investors_crm(), StubExtractor::text(EXPOSE));
        let task_id = run_to_end(&pipeline).await;

        let result = pipeline.store().get_result(&task_id);
        assert_eq!(result.curated_member, vec!["Error: curation failed"]);
        assert_eq!(pipeline.store().get_progress(&task_id).status, STATUS_COMPLETE);
    }

    #[tokio::test]
    async fn deadline_expiry_fails_the_task() {
        let model = ScriptedModel::new([FACTS]).with_delay(Duration::from_secs(5));
        let pipeline = Pipeline::new(
            Arc::new(model),
            Arc::new(investors_crm()),
            Arc::new(StubExtractor::text(EXPOSE)),
            Arc::new(TaskStore::new()),
            PipelineConfig {
                deadline_secs: 0,
                ..Default::default()
            },
        );
        let task_id = run_to_end(&pipeline).await;

        let progress = pipeline.store().get_progress(&task_id);
        assert_eq!(progress, Progress::new("Error: pipeline deadline exceeded", 100));
        assert_eq!(pipeline.store().get_result(&task_id), TaskResult::default());
    }

    #[tokio::test]
    async fn polled_progress_is_monotonic() {
        let model = ScriptedModel::new([
            FACTS,
            "Investors",
            "Erika Mustermann, Max Muster",
            EMAIL,
        ])
        .with_delay(Duration::from_millis(5));
        let pipeline = pipeline(model, investors_crm(), StubExtractor::text(EXPOSE));
        let task_id = pipeline.store().create();

        let runner = pipeline.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move { runner.run(id, Vec::new()).await });

        let mut seen = Vec::new();
        loop {
            let progress = pipeline.store().get_progress(&task_id);
            seen.push(progress.percent);
            if progress.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last(), Some(&100));
    }
}
