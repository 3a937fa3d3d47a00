//! ============================================================================
//! LLM Client - Tool-calling extraction over an OpenAI-compatible API
//! ============================================================================
//! Each memory schema becomes a function tool. The model updates an existing
//! memory by passing its id as `json_doc_id`, retires one through the
//! `RemoveDoc` tool, and records new memories by omitting the id.
//! ============================================================================

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use super::retry::retry_async;
use super::{
    ExtractionRequest, ExtractionResponse, Extractor, MemorySchema, QueryGenerator,
    ResponseMetadata, SearchQuery, StructuredOutput,
};
use crate::config::LlmConfig;
use crate::error::{MemoryError, Result};
use crate::memory::{format_conversation, Message, OperationPayload};

/// Tool offered when deletes are enabled
pub const REMOVE_DOC_TOOL: &str = "RemoveDoc";

/// Tool used for search query generation
pub const SEARCH_TOOL: &str = "search_memory";

const DOC_ID_FIELD: &str = "json_doc_id";

const SYSTEM_PROMPT: &str = "You are a memory subroutine for an AI.\n\n";

/// Client for structured-output calls
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    schemas: Vec<MemorySchema>,
}

/// A parsed tool call from the model
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

impl LlmClient {
    /// Create a client using the free-text `Memory` schema
    pub fn new(config: LlmConfig) -> Self {
        Self::with_schemas(config, vec![MemorySchema::memory()])
    }

    /// Create a client offering custom memory schemas
    pub fn with_schemas(config: LlmConfig, schemas: Vec<MemorySchema>) -> Self {
        let schemas = if schemas.is_empty() {
            vec![MemorySchema::memory()]
        } else {
            schemas
        };
        Self {
            client: Client::new(),
            config,
            schemas,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn schemas(&self) -> &[MemorySchema] {
        &self.schemas
    }

    /// POST a chat completion with tools and parse the tool calls
    async fn call_tools(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[Value],
        tool_choice: Value,
    ) -> AnyResult<Vec<ToolCall>> {
        debug!(
            "Calling {} with {} messages and {} tools",
            model,
            messages.len(),
            tools.len()
        );

        let request = ChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send chat request: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(anyhow!(
                    "Chat API error ({}): {}",
                    status,
                    error.error.message
                ));
            }
            return Err(anyhow!("Chat API error ({}): {}", status, body));
        }

        let chat_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse chat response: {} - body: {}", e, body))?;

        parse_tool_calls(chat_response)
    }
}

#[async_trait]
impl StructuredOutput for LlmClient {
    async fn structured_call(
        &self,
        instructions: &str,
        user_content: &str,
        schema: &MemorySchema,
    ) -> Result<Value> {
        let messages = vec![
            ChatMessage::new("system", instructions),
            ChatMessage::new("user", user_content),
        ];
        let tools = vec![function_tool(&schema.name, &schema.description, schema.parameters.clone())];
        let tool_choice = json!({ "type": "function", "function": { "name": schema.name } });

        let label = format!("structured call ({})", schema.name);
        let (messages, tools, tool_choice) = (&messages, &tools, &tool_choice);
        retry_async(&self.config.retry, &label, move || async move {
            let calls = self
                .call_tools(&self.config.model, messages, tools, tool_choice.clone())
                .await?;
            calls
                .into_iter()
                .find(|c| c.name == schema.name)
                .map(|c| c.arguments)
                .ok_or_else(|| anyhow!("Model did not call the {} tool", schema.name))
        })
        .await
        .map_err(MemoryError::Extraction)
    }
}

#[async_trait]
impl Extractor for LlmClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResponse> {
        let messages = build_extraction_messages(request);
        let tools = build_extraction_tools(&self.schemas, request);
        let existing_ids: HashSet<&str> = request.existing.iter().map(|r| r.id.as_str()).collect();

        let (messages, tools) = (&messages, &tools);
        let calls = retry_async(&self.config.retry, "memory extraction", move || {
            self.call_tools(&self.config.model, messages, tools, json!("required"))
        })
        .await
        .map_err(MemoryError::Extraction)?;

        debug!("Extraction returned {} tool calls", calls.len());
        Ok(interpret_tool_calls(calls, &self.schemas, request, &existing_ids))
    }
}

#[async_trait]
impl QueryGenerator for LlmClient {
    async fn generate_queries(&self, messages: &[Message]) -> Result<Vec<SearchQuery>> {
        let prompt = format!(
            "Use parallel tool calling to search for distinct memories relevant to this conversation:\n\n\
             <convo>\n{}\n</convo>.",
            format_conversation(messages)
        );
        let chat = vec![ChatMessage::new("user", &prompt)];
        let tools = vec![search_tool()];

        let (chat, tools) = (&chat, &tools);
        let calls = retry_async(&self.config.retry, "query generation", move || {
            self.call_tools(self.config.query_model(), chat, tools, json!("required"))
        })
        .await
        .map_err(MemoryError::Extraction)?;

        let queries: Vec<SearchQuery> = calls
            .into_iter()
            .filter(|c| c.name == SEARCH_TOOL)
            .filter_map(|c| match serde_json::from_value::<SearchQuery>(c.arguments) {
                Ok(query) => Some(query),
                Err(e) => {
                    warn!("Dropping malformed search query: {}", e);
                    None
                }
            })
            .collect();

        debug!("Generated {} search queries", queries.len());
        Ok(queries)
    }
}

// ============================================================================
// Prompt & Tool Construction
// ============================================================================

/// System + user messages for one extraction
pub(crate) fn build_extraction_messages(request: &ExtractionRequest) -> Vec<ChatMessage> {
    let session = if request.messages.is_empty() {
        String::new()
    } else {
        let id = Uuid::new_v4().simple().to_string();
        format!(
            "\n\n<session_{id}>\n{}\n</session_{id}>",
            format_conversation(&request.messages)
        )
    };

    let existing = if request.existing.is_empty() {
        String::new()
    } else {
        let docs: Vec<Value> = request.existing.iter().map(|r| r.to_prompt_json()).collect();
        format!(
            "\n\n<existing_memories>\n{}\n</existing_memories>",
            serde_json::to_string_pretty(&docs).unwrap_or_default()
        )
    };

    vec![
        ChatMessage::new("system", SYSTEM_PROMPT),
        ChatMessage::new(
            "user",
            &format!(
                "{}\n\nEnrich, prune, and organize memories based on any new information. \
                 If an existing memory is incorrect or outdated, update it based on the new information. \
                 To update an existing memory pass its id as `{DOC_ID_FIELD}`. \
                 All operations must be done in single parallel call.{}{}",
                request.instructions, existing, session
            ),
        ),
    ]
}

/// Schema tools (plus RemoveDoc when deletes are allowed)
pub(crate) fn build_extraction_tools(
    schemas: &[MemorySchema],
    request: &ExtractionRequest,
) -> Vec<Value> {
    let mut tools: Vec<Value> = schemas
        .iter()
        .map(|schema| {
            let parameters = with_doc_id(schema.parameters.clone(), !request.enable_inserts);
            function_tool(&schema.name, &schema.description, parameters)
        })
        .collect();

    if request.enable_deletes {
        tools.push(function_tool(
            REMOVE_DOC_TOOL,
            "Delete an existing memory that is outdated, duplicated or contradicted.",
            json!({
                "type": "object",
                "properties": {
                    "json_doc_id": { "type": "string", "description": "Id of the memory to delete." }
                },
                "required": [DOC_ID_FIELD]
            }),
        ));
    }

    tools
}

fn search_tool() -> Value {
    function_tool(
        SEARCH_TOOL,
        "Search long-term memory for entries relevant to the conversation.",
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query." },
                "filter": { "type": "object", "description": "Optional field equality filter." }
            },
            "required": ["query"]
        }),
    )
}

fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Add the optional (or required) `json_doc_id` property to a schema
fn with_doc_id(mut parameters: Value, required: bool) -> Value {
    if let Some(obj) = parameters.as_object_mut() {
        let properties = obj
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(props) = properties.as_object_mut() {
            props.insert(
                DOC_ID_FIELD.to_string(),
                json!({
                    "type": "string",
                    "description": "Id of the existing memory to update. Omit to record a new memory."
                }),
            );
        }
        if required {
            let req = obj
                .entry("required")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(list) = req.as_array_mut() {
                list.push(json!(DOC_ID_FIELD));
            }
        }
    }
    parameters
}

// ============================================================================
// Response Interpretation
// ============================================================================

/// Turn raw tool calls into payloads, dropping output the request forbids
pub(crate) fn interpret_tool_calls(
    calls: Vec<ToolCall>,
    schemas: &[MemorySchema],
    request: &ExtractionRequest,
    existing_ids: &HashSet<&str>,
) -> ExtractionResponse {
    let mut response = ExtractionResponse::default();

    for call in calls {
        if call.name == REMOVE_DOC_TOOL {
            if !request.enable_deletes {
                warn!("Dropping RemoveDoc call: deletes are disabled");
                continue;
            }
            let Some(target) = call.arguments.get(DOC_ID_FIELD).and_then(|v| v.as_str()) else {
                warn!("Dropping RemoveDoc call without {}", DOC_ID_FIELD);
                continue;
            };
            if !existing_ids.contains(target) {
                warn!("Dropping RemoveDoc for unknown memory {}", target);
                continue;
            }
            response.push(
                OperationPayload::Delete {
                    target: target.to_string(),
                },
                ResponseMetadata::for_doc(target),
            );
            continue;
        }

        if !schemas.iter().any(|s| s.name == call.name) {
            warn!("Dropping call to unknown tool {}", call.name);
            continue;
        }

        let Value::Object(mut content) = call.arguments else {
            warn!("Dropping {} call with non-object arguments", call.name);
            continue;
        };
        let doc_id = content
            .remove(DOC_ID_FIELD)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|id| !id.is_empty());

        let updates_existing = doc_id
            .as_deref()
            .is_some_and(|id| existing_ids.contains(id));
        if !request.enable_inserts && !updates_existing {
            warn!("Dropping {} insert: inserts are disabled", call.name);
            continue;
        }

        response.push(
            OperationPayload::Upsert {
                kind: Some(call.name),
                content: Value::Object(content),
            },
            ResponseMetadata { json_doc_id: doc_id },
        );
    }

    response
}

fn parse_tool_calls(response: ChatResponse) -> AnyResult<Vec<ToolCall>> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No choices in chat response"))?;

    let calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| match serde_json::from_str::<Value>(&tc.function.arguments) {
            Ok(arguments) => Some(ToolCall {
                name: tc.function.name,
                arguments,
            }),
            Err(e) => {
                warn!(
                    "Dropping {} call with unparsable arguments: {}",
                    tc.function.name, e
                );
                None
            }
        })
        .collect();

    Ok(calls)
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Vec<Value>,
    tool_choice: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Record;

    fn request(enable_inserts: bool, enable_deletes: bool) -> ExtractionRequest {
        ExtractionRequest {
            messages: vec![Message::user("I prefer pasta now")],
            existing: vec![Record::new("mem-1", "Memory", json!({"content": "likes sushi"}))],
            instructions: "Extract memories.".to_string(),
            enable_inserts,
            enable_deletes,
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_messages_include_session_and_existing() {
        let messages = build_extraction_messages(&request(true, true));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");

        let user = &messages[1].content;
        assert!(user.starts_with("Extract memories."));
        assert!(user.contains("<session_"));
        assert!(user.contains("user: I prefer pasta now"));
        assert!(user.contains("mem-1"));
        assert!(user.contains("likes sushi"));
    }

    #[test]
    fn test_messages_without_conversation_omit_session() {
        let mut req = request(true, true);
        req.messages.clear();
        let messages = build_extraction_messages(&req);
        assert!(!messages[1].content.contains("<session_"));
    }

    #[test]
    fn test_tools_follow_flags() {
        let schemas = vec![MemorySchema::memory()];

        let tools = build_extraction_tools(&schemas, &request(true, true));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1]["function"]["name"], REMOVE_DOC_TOOL);
        let params = &tools[0]["function"]["parameters"];
        assert!(params["properties"][DOC_ID_FIELD].is_object());
        assert_eq!(params["required"], json!(["content"]));

        let tools = build_extraction_tools(&schemas, &request(false, false));
        assert_eq!(tools.len(), 1);
        assert_eq!(
            tools[0]["function"]["parameters"]["required"],
            json!(["content", DOC_ID_FIELD])
        );
    }

    #[test]
    fn test_interpret_update_insert_and_delete() {
        let schemas = vec![MemorySchema::memory()];
        let req = request(true, true);
        let existing: HashSet<&str> = ["mem-1"].into_iter().collect();
        let calls = vec![
            call("Memory", json!({"content": "prefers pasta", "json_doc_id": "mem-1"})),
            call("Memory", json!({"content": "lives in Rome"})),
            call(REMOVE_DOC_TOOL, json!({"json_doc_id": "mem-1"})),
        ];

        let response = interpret_tool_calls(calls, &schemas, &req, &existing);

        assert_eq!(response.responses.len(), 3);
        assert_eq!(
            response.responses[0],
            OperationPayload::Upsert {
                kind: Some("Memory".into()),
                content: json!({"content": "prefers pasta"}),
            }
        );
        assert_eq!(response.metadata[0].json_doc_id.as_deref(), Some("mem-1"));
        assert_eq!(response.metadata[1].json_doc_id, None);
        assert_eq!(
            response.responses[2],
            OperationPayload::Delete {
                target: "mem-1".into()
            }
        );
    }

    #[test]
    fn test_interpret_drops_forbidden_output() {
        let schemas = vec![MemorySchema::memory()];
        let req = request(false, false);
        let existing: HashSet<&str> = ["mem-1"].into_iter().collect();
        let calls = vec![
            call("Memory", json!({"content": "new fact"})),
            call("Memory", json!({"content": "dangling", "json_doc_id": "nope"})),
            call(REMOVE_DOC_TOOL, json!({"json_doc_id": "mem-1"})),
            call("Unknown", json!({})),
            call("Memory", json!({"content": "update", "json_doc_id": "mem-1"})),
        ];

        let response = interpret_tool_calls(calls, &schemas, &req, &existing);

        assert_eq!(response.responses.len(), 1);
        assert_eq!(response.metadata[0].json_doc_id.as_deref(), Some("mem-1"));
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "Memory", "arguments": "{\"content\":\"likes sushi\"}" }
                    }]
                }
            }]
        });
        let response: ChatResponse = serde_json::from_value(body).unwrap();
        let calls = parse_tool_calls(response).unwrap();

        assert_eq!(calls, vec![call("Memory", json!({"content": "likes sushi"}))]);
    }

    #[test]
    fn test_parse_tool_calls_drops_only_bad_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [
                        { "function": { "name": "Memory", "arguments": "{\"content\":\"likes sushi\"}" } },
                        { "function": { "name": "Memory", "arguments": "{not json" } }
                    ]
                }
            }]
        });
        let response: ChatResponse = serde_json::from_value(body).unwrap();

        let calls = parse_tool_calls(response).unwrap();

        assert_eq!(calls, vec![call("Memory", json!({"content": "likes sushi"}))]);
    }

    #[test]
    fn test_parse_no_tool_calls_is_empty() {
        let body = json!({ "choices": [{ "message": { "content": "nothing to add" } }] });
        let response: ChatResponse = serde_json::from_value(body).unwrap();
        assert!(parse_tool_calls(response).unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore] // needs RECALL_API_KEY or OPENAI_API_KEY
    async fn test_live_extraction() {
        let client = LlmClient::new(LlmConfig::from_env().unwrap());
        let response = client
            .extract(&ExtractionRequest {
                messages: vec![Message::user("My favourite food is sushi.")],
                existing: vec![],
                instructions: crate::config::MEMORY_INSTRUCTIONS.to_string(),
                enable_inserts: true,
                enable_deletes: false,
            })
            .await
            .unwrap();
        assert!(!response.responses.is_empty());
    }
}
