//! Prompt templates per summary kind.

use super::SummaryKind;

/// Assemble the prompt sent to a text-generation backend.
pub fn build_prompt(content: &str, context: Option<&str>, kind: SummaryKind) -> String {
    let context = context.map(str::trim).filter(|c| !c.is_empty());
    match kind {
        SummaryKind::File => {
            let path = context.unwrap_or("(unknown path)");
            format!(
                "Summarize the source file `{path}` for a developer who needs to change it.\n\
                 Cover:\n\
                 1. Purpose: the file's main responsibility\n\
                 2. Key items: important functions, types and their roles\n\
                 3. Dependencies: modules or services it relies on\n\
                 4. Configuration: settings, environment variables, parameters\n\
                 5. Data flow: inputs, outputs, side effects\n\
                 6. Change guide: where to edit to extend or alter behaviour\n\n\
                 File content:\n{content}\n\n\
                 Summary:"
            )
        }
        SummaryKind::Folder => format!(
            "Summarize this folder of a source tree.\n\n\
             Structure:\n{content}\n\n\
             Summaries of its entries:\n{}\n\n\
             Describe the folder's purpose, how its entries relate to each other, \
             what it depends on, and where new code belongs.\n\n\
             Summary:",
            context.unwrap_or("(no entry summaries available)")
        ),
        SummaryKind::Root => format!(
            "Write an overview of the whole repository.\n\n\
             Top-level structure:\n{content}\n\n\
             Folder and file summaries:\n{}\n\n\
             Explain what the project does, its architecture and main components, \
             the technologies it uses, and how a developer should navigate it.\n\n\
             Overview:",
            context.unwrap_or("(no summaries available)")
        ),
        SummaryKind::Answer => format!(
            "You help a developer understand and modify a codebase.\n\n\
             Question: {content}\n\n\
             Repository context:\n{}\n\n\
             Answer directly. Name the relevant file paths from the context, and show \
             concrete changes when the question asks how to modify something.\n\n\
             Answer:",
            context.unwrap_or("(no context available)")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_prompt_names_path_and_content() {
        let prompt = build_prompt("fn main() {}", Some("src/main.rs"), SummaryKind::File);
        assert!(prompt.contains("`src/main.rs`"));
        assert!(prompt.contains("fn main() {}"));
    }

    #[test]
    fn answer_prompt_without_context() {
        let prompt = build_prompt("Where is auth?", Some("   "), SummaryKind::Answer);
        assert!(prompt.contains("Question: Where is auth?"));
        assert!(prompt.contains("(no context available)"));
    }
}
