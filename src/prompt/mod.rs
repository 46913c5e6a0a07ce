//! LLM prompt composition.
//!
//! Builds the two prompt segments: a system directive that establishes
//! the reviewer persona and the JSON output contract, and a user segment
//! carrying the repository metadata, the line-numbered diff, optional
//! related-file context, and optional ticket context. Every block is run
//! through the redactor before it enters the prompt.

pub mod redact;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::models::diff::{DiffDocument, LineMarker};
use crate::response;

pub use redact::Redactor;

/// Errors from prompt composition.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("invalid ticket pattern: {0}")]
    InvalidTicketPattern(#[from] regex::Error),
}

/// A related file surfaced by context enrichment.
#[derive(Debug, Clone)]
pub struct RelatedFile {
    pub path: String,
    /// How confident the enrichment is that the file matters, in `[0, 1]`.
    pub confidence: f64,
    pub reason: String,
    pub evidence: String,
}

/// Business context resolved from the ticket system.
#[derive(Debug, Clone)]
pub struct TicketContext {
    pub id: String,
    pub body: String,
}

/// Thin contract to the external ticket system.
#[async_trait]
pub trait TicketClient: Send + Sync {
    /// Fetch the ticket body, or `None` when the ticket has none.
    async fn fetch_body(&self, ticket_id: &str) -> Option<String>;
}

/// Default cap on a ticket-system lookup.
const DEFAULT_TICKET_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Composes review prompts.
pub struct PromptComposer {
    language: String,
    focus: String,
    ticket_pattern: Option<Regex>,
    ticket_timeout: std::time::Duration,
    redactor: Redactor,
}

impl PromptComposer {
    /// Create a composer.
    ///
    /// `ticket_pattern` is a regex whose first capture group (or whole
    /// match) is the ticket id; `None` disables ticket extraction.
    pub fn new(
        language: impl Into<String>,
        focus: impl Into<String>,
        ticket_pattern: Option<&str>,
        redact_patterns: &[String],
    ) -> Result<Self, PromptError> {
        let ticket_pattern = match ticket_pattern {
            Some(p) if !p.is_empty() => Some(Regex::new(p)?),
            _ => None,
        };
        Ok(Self {
            language: language.into(),
            focus: focus.into(),
            ticket_pattern,
            ticket_timeout: DEFAULT_TICKET_TIMEOUT,
            redactor: Redactor::new(redact_patterns),
        })
    }

    /// Override the ticket-lookup timeout.
    pub fn with_ticket_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.ticket_timeout = timeout;
        self
    }

    /// The system directive: persona plus output contract.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are an expert code reviewer for {} codebases. You review \
             change-request diffs and report findings.\n\n\
             Respond with a single JSON object conforming to this schema — \
             no prose, no markdown fences, nothing outside the JSON:\n\n\
             {}\n\n\
             Rules:\n\
             - \"severity\" must be exactly one of: \"critical\", \"major\", \"minor\", \"info\".\n\
             - \"start_line\" and \"line\" refer to line numbers in the NEW version of the file, \
             as shown in the numbered diff.\n\
             - Only report findings on lines that appear in the diff.\n\
             - Prefer precision over recall: if unsure, lower the severity or omit the finding.\n\
             - \"non_blocking_notes\" is for observations that should not block the merge.\n\
             - If there is nothing to report, return empty arrays.",
            self.language,
            response::schema_json(),
        )
    }

    /// A stricter system directive appended after a validation failure.
    pub fn strict_retry_suffix() -> &'static str {
        "\n\nIMPORTANT: Your previous response was not valid JSON. Return ONLY \
         valid JSON conforming to the schema above. Do not wrap it in code \
         fences or add any commentary."
    }

    /// The user segment for one diff chunk.
    pub fn user_prompt(
        &self,
        chunk: &DiffDocument,
        context_files: &[RelatedFile],
        ticket: Option<&TicketContext>,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Repository\n\n");
        prompt.push_str(&format!("- language: {}\n", self.language));
        prompt.push_str(&format!("- focus: {}\n\n", self.focus));

        prompt.push_str("## Diff\n\n");
        prompt.push_str("Each line is rendered as `<newLineNo> │ <marker> <text>`; \
                         removed lines have no new line number.\n\n");
        for file in &chunk.files {
            prompt.push_str(&format!("### File: {}\n\n```\n", file.path()));
            prompt.push_str(&self.redactor.redact(&render_numbered_diff(file)));
            prompt.push_str("```\n\n");
        }

        if !context_files.is_empty() {
            prompt.push_str("## Related Files\n\n");
            prompt.push_str(
                "Context enrichment flagged these files as related to the change:\n\n",
            );
            for rf in context_files {
                prompt.push_str(&self.redactor.redact(&format!(
                    "- `{}` (confidence {:.2}): {}\n  Evidence: {}\n",
                    rf.path, rf.confidence, rf.reason, rf.evidence
                )));
            }
            prompt.push('\n');
        }

        if let Some(ticket) = ticket {
            if !ticket.body.trim().is_empty() {
                prompt.push_str(&format!("## Ticket {}\n\n", ticket.id));
                prompt.push_str(&self.redactor.redact(ticket.body.trim()));
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str(
            "## Instructions\n\n\
             Review the diff above and return your findings as JSON per the \
             system directive. Use the new-file line numbers shown in the \
             left column.\n",
        );

        prompt
    }

    /// Extract a ticket id from the change-request title, then description.
    pub fn extract_ticket_id(&self, title: &str, description: &str) -> Option<String> {
        let pattern = self.ticket_pattern.as_ref()?;
        for text in [title, description] {
            if let Some(caps) = pattern.captures(text) {
                let m = caps.get(1).or_else(|| caps.get(0))?;
                return Some(m.as_str().to_string());
            }
        }
        None
    }

    /// Resolve the ticket block: extraction plus a time-bounded body
    /// fetch. Empty bodies and lookup timeouts suppress the block
    /// entirely.
    pub async fn resolve_ticket(
        &self,
        title: &str,
        description: &str,
        client: Option<&dyn TicketClient>,
    ) -> Option<TicketContext> {
        let id = self.extract_ticket_id(title, description)?;
        let body = tokio::time::timeout(self.ticket_timeout, client?.fetch_body(&id))
            .await
            .ok()??;
        if body.trim().is_empty() {
            return None;
        }
        Some(TicketContext { id, body })
    }
}

/// Render one file's hunks with explicit per-line numbering.
fn render_numbered_diff(file: &crate::models::diff::FileModification) -> String {
    let width = file
        .hunks
        .iter()
        .flat_map(|h| &h.lines)
        .filter_map(|l| l.new_line_no)
        .max()
        .unwrap_or(0)
        .to_string()
        .len()
        .max(1);

    let mut out = String::new();
    for hunk in &file.hunks {
        for line in &hunk.lines {
            if line.marker == LineMarker::Meta {
                continue;
            }
            match line.new_line_no {
                Some(n) => out.push_str(&format!(
                    "{n:>width$} │ {} {}\n",
                    line.marker.prefix(),
                    line.content
                )),
                None => out.push_str(&format!(
                    "{:>width$} │ {} {}\n",
                    "",
                    line.marker.prefix(),
                    line.content
                )),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse_unified_diff;

    fn composer() -> PromptComposer {
        PromptComposer::new("rust", "correctness", Some(r"\b([A-Z]+-\d+)\b"), &[]).unwrap()
    }

    fn sample_chunk() -> DiffDocument {
        parse_unified_diff(
            "--- a/src/auth.rs\n+++ b/src/auth.rs\n@@ -10,3 +10,4 @@\n fn check() {\n-    let ok = true;\n+    let ok = verify();\n+    audit(ok);\n }\n",
        )
        .unwrap()
    }

    #[test]
    fn system_prompt_carries_schema_and_contract() {
        let sys = composer().system_prompt();
        assert!(sys.contains("expert code reviewer"));
        assert!(sys.contains("rust"));
        assert!(sys.contains("non_blocking_notes"));
        assert!(sys.contains("\"critical\", \"major\", \"minor\", \"info\""));
    }

    #[test]
    fn user_prompt_numbers_new_lines() {
        let prompt = composer().user_prompt(&sample_chunk(), &[], None);
        assert!(prompt.contains("10 │   fn check() {"));
        assert!(prompt.contains("   │ -     let ok = true;"));
        assert!(prompt.contains("11 │ +     let ok = verify();"));
        assert!(prompt.contains("12 │ +     audit(ok);"));
        assert!(prompt.contains("13 │   }"));
    }

    #[test]
    fn user_prompt_includes_metadata_block() {
        let prompt = composer().user_prompt(&sample_chunk(), &[], None);
        assert!(prompt.contains("- language: rust"));
        assert!(prompt.contains("- focus: correctness"));
    }

    #[test]
    fn context_block_lists_related_files() {
        let related = vec![RelatedFile {
            path: "src/session.rs".into(),
            confidence: 0.82,
            reason: "calls verify()".into(),
            evidence: "session.rs:40 verify(token)".into(),
        }];
        let prompt = composer().user_prompt(&sample_chunk(), &related, None);
        assert!(prompt.contains("## Related Files"));
        assert!(prompt.contains("`src/session.rs` (confidence 0.82)"));
        assert!(prompt.contains("calls verify()"));
    }

    #[test]
    fn context_block_absent_without_files() {
        let prompt = composer().user_prompt(&sample_chunk(), &[], None);
        assert!(!prompt.contains("## Related Files"));
    }

    #[test]
    fn ticket_block_rendered_when_present() {
        let ticket = TicketContext {
            id: "PROJ-123".into(),
            body: "Users must stay logged in across restarts.".into(),
        };
        let prompt = composer().user_prompt(&sample_chunk(), &[], Some(&ticket));
        assert!(prompt.contains("## Ticket PROJ-123"));
        assert!(prompt.contains("stay logged in"));
    }

    #[test]
    fn blank_ticket_body_suppresses_block() {
        let ticket = TicketContext {
            id: "PROJ-123".into(),
            body: "   ".into(),
        };
        let prompt = composer().user_prompt(&sample_chunk(), &[], Some(&ticket));
        assert!(!prompt.contains("## Ticket"));
    }

    #[test]
    fn secrets_are_redacted_from_diff() {
        let chunk = parse_unified_diff(
            "--- a/conf.rs\n+++ b/conf.rs\n@@ -1,1 +1,1 @@\n-let a = 1;\n+let api_key = \"sk-supersecret1234\";\n",
        )
        .unwrap();
        let prompt = composer().user_prompt(&chunk, &[], None);
        assert!(!prompt.contains("sk-supersecret1234"));
        assert!(prompt.contains("[REDACTED]"));
    }

    #[test]
    fn ticket_id_from_title_wins() {
        let c = composer();
        assert_eq!(
            c.extract_ticket_id("PROJ-42: fix login", "see ALSO-7"),
            Some("PROJ-42".to_string())
        );
    }

    #[test]
    fn ticket_id_falls_back_to_description() {
        let c = composer();
        assert_eq!(
            c.extract_ticket_id("fix login", "relates to PROJ-42"),
            Some("PROJ-42".to_string())
        );
        assert_eq!(c.extract_ticket_id("fix login", "no id here"), None);
    }

    #[test]
    fn no_pattern_means_no_extraction() {
        let c = PromptComposer::new("rust", "all", None, &[]).unwrap();
        assert_eq!(c.extract_ticket_id("PROJ-42", "PROJ-42"), None);
    }

    struct FixedTicketClient(Option<String>);

    #[async_trait]
    impl TicketClient for FixedTicketClient {
        async fn fetch_body(&self, _ticket_id: &str) -> Option<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn resolve_ticket_requires_both_id_and_body() {
        let c = composer();
        let client = FixedTicketClient(Some("The body".into()));

        let resolved = c
            .resolve_ticket("PROJ-9: thing", "", Some(&client))
            .await
            .unwrap();
        assert_eq!(resolved.id, "PROJ-9");
        assert_eq!(resolved.body, "The body");

        // No id → no block, even with a client.
        assert!(c.resolve_ticket("no id", "", Some(&client)).await.is_none());

        // Empty body → no block.
        let empty = FixedTicketClient(Some("  ".into()));
        assert!(c
            .resolve_ticket("PROJ-9", "", Some(&empty))
            .await
            .is_none());

        // No client → no block.
        assert!(c.resolve_ticket("PROJ-9", "", None).await.is_none());
    }

    struct SlowTicketClient;

    #[async_trait]
    impl TicketClient for SlowTicketClient {
        async fn fetch_body(&self, _ticket_id: &str) -> Option<String> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Some("too late".into())
        }
    }

    #[tokio::test]
    async fn slow_ticket_lookup_is_suppressed() {
        let c = composer().with_ticket_timeout(std::time::Duration::from_millis(10));
        assert!(c
            .resolve_ticket("PROJ-9", "", Some(&SlowTicketClient))
            .await
            .is_none());
    }
}
