use serde::Deserialize;
use serde_json::Value;

use crate::command::CommandSpec;
use crate::domain::{Profile, UserId};
use crate::error::HarvestError;

/// Users of one encounters page. `skipped` counts entries that had no usable
/// `user_id` and so can be neither stored nor disliked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncounterPage {
    pub users: Vec<Profile>,
    pub skipped: usize,
}

/// Source of encounter pages, plus the action taken on every user seen.
pub trait EncounterSource {
    fn next_page(&self) -> Result<EncounterPage, HarvestError>;
    fn dislike(&self, user: &UserId) -> Result<(), HarvestError>;
}

impl<S: EncounterSource + ?Sized> EncounterSource for &S {
    fn next_page(&self) -> Result<EncounterPage, HarvestError> {
        (**self).next_page()
    }

    fn dislike(&self, user: &UserId) -> Result<(), HarvestError> {
        (**self).dislike(user)
    }
}

/// Runs the external API client: `encounters` prints a page as JSON,
/// `dislike <user_id>` dismisses one user.
#[derive(Debug, Clone)]
pub struct CommandEncounterSource {
    encounters: CommandSpec,
    dislike: CommandSpec,
}

impl CommandEncounterSource {
    pub fn new(encounters: CommandSpec, dislike: CommandSpec) -> Self {
        Self {
            encounters,
            dislike,
        }
    }
}

impl EncounterSource for CommandEncounterSource {
    fn next_page(&self) -> Result<EncounterPage, HarvestError> {
        let stdout = self.encounters.output(&[])?;
        parse_page(&stdout)
    }

    fn dislike(&self, user: &UserId) -> Result<(), HarvestError> {
        self.dislike.run(&[user.as_str()])
    }
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    body: Vec<PageSection>,
}

#[derive(Deserialize)]
struct PageSection {
    #[serde(default)]
    client_encounters: Option<ClientEncounters>,
}

#[derive(Deserialize)]
struct ClientEncounters {
    #[serde(default)]
    results: Vec<EncounterResult>,
}

#[derive(Deserialize)]
struct EncounterResult {
    user: Option<Value>,
}

/// Extracts the users of one page shaped as
/// `{body: [{client_encounters: {results: [{user: {...}}]}}]}`.
/// A user only needs a valid `user_id`; the rest of the record is kept as is.
pub fn parse_page(bytes: &[u8]) -> Result<EncounterPage, HarvestError> {
    let raw: RawPage =
        serde_json::from_slice(bytes).map_err(|err| HarvestError::EncounterParse(err.to_string()))?;
    let mut page = EncounterPage::default();
    for section in raw.body {
        let Some(encounters) = section.client_encounters else {
            continue;
        };
        for result in encounters.results {
            let Some(user) = result.user else {
                continue;
            };
            match Profile::from_value(user) {
                Ok(profile) => page.users.push(profile),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping user without a usable id");
                    page.skipped += 1;
                }
            }
        }
    }
    Ok(page)
}
