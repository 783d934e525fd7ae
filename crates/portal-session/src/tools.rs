use portal_core::tools::ToolDefinition;

pub const WEB_SEARCH_TOOL: &str = "web_search";

const SUMMARIZE_NOTE: &str =
    "Summarize the most relevant results in a few sentences instead of returning raw result lists.";
const CONFIRM_NOTE: &str =
    "Deep research mode is on: ask the user for explicit confirmation before starting a deep research job.";

pub fn default_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        WEB_SEARCH_TOOL,
        "Search the web for current information.",
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            }
        }),
    )]
}

/// Per-request copy of `tools` with the `web_search` description rewritten.
/// The input list is left untouched.
pub fn augment_tools(tools: &[ToolDefinition], deep_research: bool) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| {
            if tool.name != WEB_SEARCH_TOOL {
                return tool.clone();
            }
            let mut description = format!("{} {SUMMARIZE_NOTE}", tool.description.trim_end());
            if deep_research {
                description.push(' ');
                description.push_str(CONFIRM_NOTE);
            }
            ToolDefinition {
                description,
                ..tool.clone()
            }
        })
        .collect()
}
