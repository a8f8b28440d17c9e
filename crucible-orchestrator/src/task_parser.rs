//! Task-block grammar (§6): delimited `@@@task ... @@@` blocks with headed
//! Markdown-like sections, consumed by the registration stage. The parser
//! is pluggable; [`DefaultTaskBlockParser`] is the canonical implementation.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTaskBlock {
    pub title: String,
    pub objective: String,
    pub scope: Vec<String>,
    pub definition_of_done: Vec<String>,
    pub verification_hints: Vec<String>,
    /// Titles of previously defined tasks this one depends on.
    pub dependencies: Vec<String>,
}

pub trait TaskBlockParser: Send + Sync {
    fn parse(&self, text: &str) -> Vec<ParsedTaskBlock>;
}

#[derive(Default)]
pub struct DefaultTaskBlockParser;

impl TaskBlockParser for DefaultTaskBlockParser {
    fn parse(&self, text: &str) -> Vec<ParsedTaskBlock> {
        extract_blocks(text)
            .into_iter()
            .map(|body| parse_block(&body))
            .collect()
    }
}

fn extract_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("@@@task") {
        let after_open = &rest[start + "@@@task".len()..];
        let Some(end_rel) = after_open.find("@@@") else {
            break;
        };
        blocks.push(after_open[..end_rel].to_string());
        rest = &after_open[end_rel + "@@@".len()..];
    }
    blocks
}

enum Section {
    Title,
    Objective,
    Scope,
    DefinitionOfDone,
    Verification,
    Dependencies,
    None,
}

fn parse_block(body: &str) -> ParsedTaskBlock {
    let mut block = ParsedTaskBlock::default();
    let mut section = Section::None;

    for raw_line in body.lines() {
        let line = raw_line.trim();
        if let Some(title) = line.strip_prefix("# ") {
            block.title = title.trim().to_string();
            section = Section::Title;
            continue;
        }
        if let Some(heading) = line.strip_prefix("## ") {
            section = match heading.trim().to_lowercase().as_str() {
                "objective" => Section::Objective,
                "scope" => Section::Scope,
                "definition of done" => Section::DefinitionOfDone,
                "verification" => Section::Verification,
                "dependencies" => Section::Dependencies,
                _ => Section::None,
            };
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let item = line.trim_start_matches(['-', '*']).trim().to_string();
        match section {
            Section::Objective => {
                if !block.objective.is_empty() {
                    block.objective.push(' ');
                }
                block.objective.push_str(&item);
            }
            Section::Scope => block.scope.push(item),
            Section::DefinitionOfDone => block.definition_of_done.push(item),
            Section::Verification => block.verification_hints.push(item),
            Section::Dependencies => {
                for part in item.split(',') {
                    let dep = part.trim();
                    if !dep.is_empty() {
                        block.dependencies.push(dep.to_string());
                    }
                }
            }
            Section::Title | Section::None => {}
        }
    }

    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_task_block() {
        let text = r#"
@@@task
# Add login endpoint
## Objective
Implement a login endpoint.
## Scope
- auth module
## Definition of Done
- tests pass
## Verification
- run integration tests
@@@
"#;
        let blocks = DefaultTaskBlockParser.parse(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title, "Add login endpoint");
        assert_eq!(blocks[0].objective, "Implement a login endpoint.");
        assert_eq!(blocks[0].scope, vec!["auth module"]);
        assert_eq!(blocks[0].definition_of_done, vec!["tests pass"]);
    }

    #[test]
    fn parses_dependencies_as_comma_separated_titles() {
        let text = r#"
@@@task
# Second task
## Objective
Do the second thing.
## Dependencies
Add login endpoint, Another task
@@@
"#;
        let blocks = DefaultTaskBlockParser.parse(text);
        assert_eq!(blocks[0].dependencies, vec!["Add login endpoint", "Another task"]);
    }

    #[test]
    fn no_task_blocks_yields_empty_list() {
        assert!(DefaultTaskBlockParser.parse("no tasks here").is_empty());
        assert!(DefaultTaskBlockParser.parse("").is_empty());
    }

    #[test]
    fn multiple_blocks_are_all_parsed() {
        let text = "@@@task\n# A\n## Objective\nfirst\n@@@\n@@@task\n# B\n## Objective\nsecond\n@@@";
        let blocks = DefaultTaskBlockParser.parse(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].title, "A");
        assert_eq!(blocks[1].title, "B");
    }
}
