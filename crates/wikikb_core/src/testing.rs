use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::client::{EncyclopediaApi, LookupError, Page, TitleLookup};
use crate::fetch::Pause;

#[derive(Debug, Clone)]
pub enum Reply {
    Page(String),
    Ambiguous,
    Missing,
    Transient,
}

/// Scripted encyclopedia keyed by `(language, title)`. Replies are consumed in
/// order and the last one repeats; unscripted titles are missing.
#[derive(Debug, Default)]
pub struct ScriptedApi {
    replies: BTreeMap<(String, String), VecDeque<Reply>>,
    links: BTreeMap<String, Vec<String>>,
    pub calls: Vec<(String, String, TitleLookup)>,
}

impl ScriptedApi {
    pub fn script(mut self, language: &str, title: &str, replies: Vec<Reply>) -> Self {
        self.replies
            .insert((language.to_string(), title.to_string()), replies.into());
        self
    }

    pub fn page(self, language: &str, title: &str, wikitext: &str) -> Self {
        self.script(language, title, vec![Reply::Page(wikitext.to_string())])
    }

    pub fn topic(self, language: &str, title: &str, links: &[&str]) -> Self {
        let mut api = self.page(language, title, "topic body");
        api.links.insert(
            title.to_string(),
            links.iter().map(ToString::to_string).collect(),
        );
        api
    }

    pub fn languages_called(&self) -> Vec<&str> {
        self.calls
            .iter()
            .map(|(language, _, _)| language.as_str())
            .collect()
    }

    fn next_reply(&mut self, language: &str, title: &str) -> Reply {
        let Some(queue) = self
            .replies
            .get_mut(&(language.to_string(), title.to_string()))
        else {
            return Reply::Missing;
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Reply::Missing)
        } else {
            queue.front().cloned().unwrap_or(Reply::Missing)
        }
    }
}

impl EncyclopediaApi for ScriptedApi {
    fn fetch_page(
        &mut self,
        language: &str,
        title: &str,
        lookup: TitleLookup,
    ) -> Result<Page, LookupError> {
        self.calls
            .push((language.to_string(), title.to_string(), lookup));
        match self.next_reply(language, title) {
            Reply::Page(wikitext) => Ok(Page {
                title: title.to_string(),
                language: language.to_string(),
                wikitext,
            }),
            Reply::Ambiguous => Err(LookupError::Disambiguation {
                title: title.to_string(),
                options: vec![format!("{title} (a)"), format!("{title} (b)")],
            }),
            Reply::Missing => Err(LookupError::NotFound {
                title: title.to_string(),
            }),
            Reply::Transient => Err(LookupError::Other(anyhow::anyhow!("connection reset"))),
        }
    }

    fn page_links(&mut self, page: &Page) -> Result<Vec<String>, LookupError> {
        self.links
            .get(&page.title)
            .cloned()
            .ok_or_else(|| LookupError::Other(anyhow::anyhow!("no links scripted")))
    }

    fn request_count(&self) -> usize {
        self.calls.len()
    }
}

#[derive(Debug, Default)]
pub struct RecordingPause {
    pub waits: Vec<Duration>,
}

impl RecordingPause {
    pub fn total(&self) -> Duration {
        self.waits.iter().sum()
    }
}

impl Pause for RecordingPause {
    fn pause(&mut self, duration: Duration) {
        self.waits.push(duration);
    }
}
