use crucible_types::CompletionReport;

/// Turns an agent's free-form text into a [`CompletionReport`] when it
/// didn't call the `report_to_parent` tool (§4.6). Pluggable; returns
/// `None` when the text itself can't be parsed, in which case the caller
/// synthesizes a failure report per §9's report-parsing-fallback guidance.
pub trait ReportParser: Send + Sync {
    fn parse(&self, agent_id: &str, task_id: &str, text: &str) -> Option<CompletionReport>;
}

#[derive(Default)]
pub struct DefaultReportParser;

const SUMMARY_CAP: usize = 200;

impl ReportParser for DefaultReportParser {
    fn parse(&self, agent_id: &str, task_id: &str, text: &str) -> Option<CompletionReport> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let lower = trimmed.to_lowercase();
        let success = !(lower.contains("fail") || lower.contains("error") || lower.contains("could not"));

        let mut summary: String = trimmed
            .split_inclusive('.')
            .take(3)
            .collect::<Vec<_>>()
            .concat()
            .trim()
            .to_string();
        if summary.is_empty() {
            summary = trimmed.to_string();
        }
        if summary.len() > SUMMARY_CAP {
            summary.truncate(SUMMARY_CAP);
        }

        let files_modified = trimmed
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))
            })
            .filter(|candidate| candidate.contains('/') || candidate.contains('.'))
            .map(|s| s.to_string())
            .collect();

        Some(CompletionReport {
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            summary,
            files_modified,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_fails_to_parse() {
        assert!(DefaultReportParser.parse("a", "t", "").is_none());
    }

    #[test]
    fn success_heuristic_from_text() {
        let report = DefaultReportParser.parse("a", "t", "Implemented the endpoint. Tests pass.").unwrap();
        assert!(report.success);
    }

    #[test]
    fn failure_keywords_flip_success_to_false() {
        let report = DefaultReportParser.parse("a", "t", "The build failed with an error.").unwrap();
        assert!(!report.success);
    }

    #[test]
    fn summary_is_capped() {
        let long = "x".repeat(500);
        let report = DefaultReportParser.parse("a", "t", &long).unwrap();
        assert!(report.summary.len() <= SUMMARY_CAP);
    }
}
