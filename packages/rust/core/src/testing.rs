//! In-process collaborators for pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use exposecast_crm::CrmGateway;
use exposecast_document::TextExtractor;
use exposecast_llm::TextModel;
use exposecast_shared::{
    CompanyRecord, ContactRecord, ExposecastError, ListDescriptor, RecordBase, Result,
};

/// Model answering with a fixed script; the last answer repeats once exhausted.
pub struct ScriptedModel {
    answers: Vec<String>,
    delay: Duration,
    calls: AtomicUsize,
    user_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            user_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn user_prompts(&self) -> Vec<String> {
        self.user_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, _system: &str, user: &str) -> String {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.user_prompts.lock().unwrap().push(user.to_string());
        self.answers
            .get(call)
            .or_else(|| self.answers.last())
            .cloned()
            .unwrap_or_default()
    }
}

/// CRM holding a fixed set of lists and records.
#[derive(Default)]
pub struct StubCrm {
    pub lists: Vec<ListDescriptor>,
    pub fail_lists: bool,
    pub members: HashMap<String, Vec<String>>,
    pub contacts: Vec<ContactRecord>,
    pub companies: Vec<CompanyRecord>,
}

impl StubCrm {
    pub fn with_list(mut self, name: &str, list_id: &str, member_ids: &[&str]) -> Self {
        self.lists.push(ListDescriptor {
            name: name.into(),
            list_id: list_id.into(),
        });
        self.members.insert(
            list_id.into(),
            member_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn with_contact(mut self, id: &str, first: &str, last: &str) -> Self {
        self.contacts.push(ContactRecord {
            base: base(id),
            email: format!("{}@example.com", first.to_lowercase()),
            firstname: first.into(),
            lastname: last.into(),
        });
        self
    }

    pub fn with_company(mut self, id: &str, name: &str) -> Self {
        self.companies.push(CompanyRecord {
            base: base(id),
            name: name.into(),
        });
        self
    }
}

fn base(id: &str) -> RecordBase {
    RecordBase {
        hs_object_id: id.into(),
        createdate: "2024-01-01T00:00:00Z".into(),
        lastmodifieddate: "2024-06-01T00:00:00Z".into(),
        lifecycle_stage: "customer".into(),
        associations: String::new(),
    }
}

#[async_trait]
impl CrmGateway for StubCrm {
    async fn list_all(&self) -> Result<Vec<ListDescriptor>> {
        if self.fail_lists {
            return Err(ExposecastError::Crm("connection refused".into()));
        }
        Ok(self.lists.clone())
    }

    async fn members_of(&self, list_id: &str) -> Result<Vec<String>> {
        Ok(self.members.get(list_id).cloned().unwrap_or_default())
    }

    async fn contact_details(&self, ids: &[String]) -> Result<Vec<ContactRecord>> {
        Ok(self
            .contacts
            .iter()
            .filter(|c| ids.contains(&c.base.hs_object_id))
            .cloned()
            .collect())
    }

    async fn company_details(&self, ids: &[String]) -> Result<Vec<CompanyRecord>> {
        Ok(self
            .companies
            .iter()
            .filter(|c| ids.contains(&c.base.hs_object_id))
            .cloned()
            .collect())
    }
}

/// Extractor returning a fixed text, or failing when none is set.
pub struct StubExtractor(pub Option<String>);

impl StubExtractor {
    pub fn text(text: &str) -> Self {
        Self(Some(text.into()))
    }
}

impl TextExtractor for StubExtractor {
    fn extract_text(&self, _bytes: &[u8]) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| ExposecastError::Document("failed to extract text from PDF".into()))
    }
}
