//! Prompt templates for every model call the pipeline makes.

/// A system/user prompt pair ready for [`TextModel::complete`](crate::TextModel::complete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// ---------------------------------------------------------------------------
// Key facts
// ---------------------------------------------------------------------------

const KEY_FACTS_SYSTEM: &str = r#"You extract key facts from German and English real estate exposés.

Return exactly one JSON object of this shape and nothing else:
{
  "address": {
    "street": string,
    "house_number": string,
    "postal_code": string,
    "city": string,
    "population": number
  },
  "purchase_price": string,
  "price_per_square": string,
  "usable_area": number,
  "plot_size": number,
  "residential_units": number,
  "rental_income": string,
  "wault": number
}

Field synonyms:
- street / house_number: Straße, Str., Hausnummer, Nr., Lage, Anschrift
- postal_code / city: PLZ, Postleitzahl, Ort, Stadt, Gemeinde, Standort
- population: Einwohner, Einwohnerzahl, inhabitants
- purchase_price: Kaufpreis, Angebotspreis, Verkaufspreis, asking price
- price_per_square: Preis pro m², Kaufpreis/m², €/m², price per sqm
- usable_area: Nutzfläche, Wohnfläche, Mietfläche, Gesamtfläche, lettable area
- plot_size: Grundstücksfläche, Grundstück, Grundstücksgröße, site area
- residential_units: Wohneinheiten, WE, Einheiten, Wohnungen, units
- rental_income: Mieteinnahmen, Jahresnettokaltmiete, Ist-Miete, Soll-Miete, rent roll
- wault: WALT, WAULT, gewichtete durchschnittliche Restlaufzeit

Normalization:
- areas as plain numbers in m² (convert ha and ft², drop units)
- currency amounts as Euro strings with dot thousands separators, e.g. "1.250.000 €"
- postal codes as exactly five digits
- monthly rents multiplied by 12 to annual figures
- WAULT as years, e.g. 4.5

Omit every field the text gives no evidence for. Never guess."#;

/// Prompt asking for the structured key facts of an exposé.
pub fn key_facts(text: &str) -> Prompt {
    Prompt {
        system: KEY_FACTS_SYSTEM.to_string(),
        user: format!(
            "Exposé text: {text}\n\nExtract the key facts from this exposé in the specified JSON \
             format, without markdown tags or code fences."
        ),
    }
}

// ---------------------------------------------------------------------------
// List selection
// ---------------------------------------------------------------------------

const LIST_SELECTION_SYSTEM: &str = "You analyze real estate exposés and match them to the most \
appropriate CRM list based on the content. Select the best matching list from the provided \
options. Respond with only the name of the selected list.";

/// Prompt asking which of `list_names` fits the exposé best.
pub fn list_selection(text: &str, list_names: &[&str]) -> Prompt {
    Prompt {
        system: LIST_SELECTION_SYSTEM.to_string(),
        user: format!(
            "Exposé text: {text}\n\nAvailable lists: {}",
            list_names.join(", ")
        ),
    }
}

// ---------------------------------------------------------------------------
// Curation
// ---------------------------------------------------------------------------

/// Prompt asking for the top `limit` performers among `entities`.
///
/// `violation` describes what was wrong with the previous answer; it turns
/// the request into a repair request.
pub fn curation(entities: &str, limit: usize, violation: Option<&str>) -> Prompt {
    let system = format!(
        "You evaluate companies and people from the German real estate industry. Proceed \
         systematically and objectively and rely only on facts and reputable sources. Rank the \
         given entries by market presence in the German property market (awareness, market \
         share, media presence) and by key financial figures such as revenue, profit growth or \
         total assets where available.\n\n\
         Answer with the names of the top {limit} entries as one comma-separated line, best \
         first. Keep every name exactly as given, including legal forms such as GmbH, AG or \
         GmbH & Co. KG. Do not use brackets, quotes, numbering, explanations or markdown."
    );

    let mut user = format!(
        "Entries: {entities}\n\nReturn the top {limit} as a comma-separated line only."
    );
    if let Some(violation) = violation {
        user.push_str(&format!(
            "\n\nYour previous answer was rejected: {violation}. Fix this and answer again \
             with the comma-separated names only."
        ));
    }

    Prompt { system, user }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

const EMAIL_SYSTEM: &str = "You write modern, eye-catching (with emojis and current buzzwords) \
yet highly professional emails in German that market real estate properties. Analyze the given \
exposé and the name of the target audience.";

/// Prompt asking for a German HTML marketing email aimed at `list_name`.
pub fn email(text: &str, list_name: &str) -> Prompt {
    Prompt {
        system: EMAIL_SYSTEM.to_string(),
        user: format!(
            "Exposé text: {text}\n\nList name: {list_name}\n\nWrite a fitting email for this \
             target audience. Respond with the HTML email only, styled exclusively with \
             MDBootstrap CSS classes (no custom style tags), and without markdown tags or code \
             fences."
        ),
    }
}
