//! Mapping global stages back to catalog templates and rendering their copy.

use std::sync::OnceLock;

use leadloop_adapters::fields::normalize_key;
use leadloop_core::{SourceLoop, TemplateEntry};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_AGENT_NAME: &str = "The Team";
const UNKNOWN_LOOP: &str = "Unknown";
const ANONYMOUS_LEAD: &str = "there";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTemplate {
    pub subject: String,
    pub content: String,
    pub loop_name: String,
    /// Name of the catalog entry used, `None` for the fallback copy.
    pub template_name: Option<String>,
}

fn email_stage_re() -> &'static Regex {
    static EMAIL_STAGE_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_STAGE_RE.get_or_init(|| Regex::new(r"(?i)Email (\d+)").expect("valid email stage regex"))
}

fn lead_name_re() -> &'static Regex {
    static LEAD_NAME_RE: OnceLock<Regex> = OnceLock::new();
    LEAD_NAME_RE.get_or_init(|| {
        Regex::new(r"(?i)\{\{\s*(?:name|lead_name|lead name)\s*\}\}|\{(?:name|lead_name)\}|\[(?:name|lead name)\]")
            .expect("valid lead name regex")
    })
}

fn first_name_re() -> &'static Regex {
    static FIRST_NAME_RE: OnceLock<Regex> = OnceLock::new();
    FIRST_NAME_RE.get_or_init(|| {
        Regex::new(r"(?i)\{\{\s*first_name\s*\}\}|\{first_name\}|\[first name\]").expect("valid first name regex")
    })
}

fn agent_name_re() -> &'static Regex {
    static AGENT_NAME_RE: OnceLock<Regex> = OnceLock::new();
    AGENT_NAME_RE.get_or_init(|| {
        Regex::new(r"(?i)\{\{\s*(?:agent_name|agent)\s*\}\}|\{agent(?:_name)?\}|\[(?:agent name|your name)\]")
            .expect("valid agent name regex")
    })
}

fn greeting_re() -> &'static Regex {
    static GREETING_RE: OnceLock<Regex> = OnceLock::new();
    GREETING_RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:hi|hello|hey|dear|greetings|good (?:morning|afternoon|evening))\b")
            .expect("valid greeting regex")
    })
}

fn closing_re() -> &'static Regex {
    static CLOSING_RE: OnceLock<Regex> = OnceLock::new();
    CLOSING_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:best|best regards|kind regards|warm regards|regards|thanks|thank you|many thanks|cheers|sincerely|talk soon)[,!.]?$",
        )
        .expect("valid closing regex")
    })
}

/// Local catalog key and loop for a global `Email N` stage. Other stages have
/// no inverse mapping.
pub fn local_stage_for(global_stage: &str) -> Option<(String, SourceLoop)> {
    let caps = email_stage_re().captures(global_stage)?;
    let n = caps[1].parse::<u32>().ok()?;
    let (local, source_loop) = if n <= 3 {
        (n, SourceLoop::Intro)
    } else if n <= 6 {
        (n - SourceLoop::FollowUp.email_offset(), SourceLoop::FollowUp)
    } else {
        (n - SourceLoop::Nurture.email_offset(), SourceLoop::Nurture)
    };
    Some((format!("Email {local}"), source_loop))
}

fn same_category(category: &str, source_loop: SourceLoop) -> bool {
    normalize_key(category) == normalize_key(source_loop.display_name())
}

/// Exact key and category, then key alone, then any template whose name the
/// stage contains. First hit wins at each step.
pub fn find_template<'a>(
    global_stage: &str,
    local: Option<&(String, SourceLoop)>,
    catalog: &'a [TemplateEntry],
) -> Option<&'a TemplateEntry> {
    if let Some((key, source_loop)) = local {
        let keyed = catalog
            .iter()
            .filter(|t| t.name.trim().eq_ignore_ascii_case(key))
            .collect::<Vec<_>>();
        if let Some(t) = keyed.iter().copied().find(|t| {
            t.category
                .as_deref()
                .is_some_and(|c| same_category(c, *source_loop))
        }) {
            return Some(t);
        }
        if let Some(t) = keyed.first().copied() {
            return Some(t);
        }
    }
    catalog
        .iter()
        .find(|t| !t.name.trim().is_empty() && global_stage.contains(t.name.trim()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateResolver {
    agent_name: String,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_NAME)
    }
}

impl TemplateResolver {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }

    pub fn resolve(&self, global_stage: &str, lead_name: &str, catalog: &[TemplateEntry]) -> ResolvedTemplate {
        let local = local_stage_for(global_stage);
        let computed_loop = local.as_ref().map(|(_, l)| l.display_name());

        let Some(template) = find_template(global_stage, local.as_ref(), catalog) else {
            debug!(stage = global_stage, "no catalog template; using fallback copy");
            let content = match &local {
                Some((key, source_loop)) => format!(
                    "No template found for {global_stage}. Add an entry named \"{key}\" in the {} category.",
                    source_loop.display_name()
                ),
                None => format!("No template found for {global_stage}."),
            };
            return ResolvedTemplate {
                subject: format!("Outreach: {global_stage}"),
                content,
                loop_name: computed_loop.unwrap_or(UNKNOWN_LOOP).to_string(),
                template_name: None,
            };
        };

        let subject = template
            .subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&template.name);
        let loop_name = computed_loop
            .map(ToString::to_string)
            .or_else(|| template.category.clone())
            .unwrap_or_else(|| UNKNOWN_LOOP.to_string());

        ResolvedTemplate {
            subject: self.fill_placeholders(subject, lead_name),
            content: reflow(&self.fill_placeholders(template.body(), lead_name)),
            loop_name,
            template_name: Some(template.name.clone()),
        }
    }

    pub fn fill_placeholders(&self, text: &str, lead_name: &str) -> String {
        let full = lead_name.trim();
        let full = if full.is_empty() { ANONYMOUS_LEAD } else { full };
        let first = full.split_whitespace().next().unwrap_or(ANONYMOUS_LEAD);
        let text = lead_name_re().replace_all(text, NoExpand(full));
        let text = first_name_re().replace_all(&text, NoExpand(first));
        agent_name_re()
            .replace_all(&text, NoExpand(self.agent_name.as_str()))
            .into_owned()
    }
}

pub fn resolve_template(global_stage: &str, lead_name: &str, catalog: &[TemplateEntry]) -> ResolvedTemplate {
    TemplateResolver::default().resolve(global_stage, lead_name, catalog)
}

fn is_greeting(line: &str) -> bool {
    greeting_re().is_match(line) && (line.ends_with(',') || line.ends_with('!'))
}

fn is_closing(line: &str) -> bool {
    closing_re().is_match(line)
}

fn is_signature_marker(line: &str) -> bool {
    line == "--" || line == "—" || line.starts_with("Sent from ")
}

/// Inserts a blank line before and/or after each matching line unless the
/// neighbour is already blank or missing.
fn pad_lines(text: &str, matches: fn(&str) -> bool, before: bool, after: bool) -> String {
    let lines = text.split('\n').collect::<Vec<_>>();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 4);
    for (i, line) in lines.iter().copied().enumerate() {
        let hit = matches(line.trim());
        if hit && before && out.last().is_some_and(|prev| !prev.trim().is_empty()) {
            out.push("");
        }
        out.push(line);
        if hit && after && lines.get(i + 1).is_some_and(|next| !next.trim().is_empty()) {
            out.push("");
        }
    }
    out.join("\n")
}

/// Cosmetic spacing for catalog copy pasted from spreadsheets. Greeting
/// spacing runs before closing spacing.
pub fn reflow(text: &str) -> String {
    let text = text.replace("\\n", "\n").replace("\r\n", "\n");
    let text = pad_lines(&text, is_greeting, false, true);
    let text = pad_lines(&text, is_closing, true, true);
    pad_lines(&text, is_signature_marker, true, false).trim().to_string()
}
