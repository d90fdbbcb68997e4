use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::AIClient;
use crate::cost::estimate_request_cost;
use crate::error::AIError;
use crate::stream::ChatStream;
use crate::types::{
    ChatMessage, ChatRequest, ChatResult, ContentPart, Cost, ResponseFormat, Role, Tool,
    ToolChoice,
};

/// Fluent request builder bound to a client.
///
/// Mutators take `&mut self` and return the same builder, so calls chain:
///
/// ```no_run
/// # use relay_llm::client::AIClient;
/// # async fn demo(client: AIClient) -> Result<(), relay_llm::error::AIError> {
/// let result = client
///     .request("fast")
///     .system("Answer in one sentence.")
///     .user("Why is the sky blue?")
///     .temperature(0.2)
///     .send()
///     .await?;
/// println!("{} (${:.6})", result.content, result.cost.total);
/// # Ok(())
/// # }
/// ```
pub struct RequestBuilder<'a> {
    client: &'a AIClient,
    request: ChatRequest,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a AIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            request: ChatRequest::new(model),
        }
    }

    pub fn model(&mut self, model: impl Into<String>) -> &mut Self {
        self.request.model = model.into();
        self
    }

    pub fn system(&mut self, text: impl Into<String>) -> &mut Self {
        self.message(ChatMessage::system(text))
    }

    pub fn user(&mut self, text: impl Into<String>) -> &mut Self {
        self.message(ChatMessage::user(text))
    }

    pub fn assistant(&mut self, text: impl Into<String>) -> &mut Self {
        self.message(ChatMessage::assistant(text))
    }

    pub fn message(&mut self, message: ChatMessage) -> &mut Self {
        self.request.messages.push(message);
        self
    }

    pub fn messages<I>(&mut self, messages: I) -> &mut Self
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        self.request.messages.extend(messages);
        self
    }

    /// Attaches an image by URL (`http(s)` or `data:`) to the current user turn.
    pub fn image(&mut self, url: impl Into<String>) -> &mut Self {
        self.push_user_part(ContentPart::image_url(url))
    }

    /// Attaches base64 image bytes to the current user turn.
    pub fn image_base64(
        &mut self,
        data: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> &mut Self {
        self.push_user_part(ContentPart::image_base64(data, mime_type))
    }

    pub fn temperature(&mut self, temperature: f32) -> &mut Self {
        self.request.options.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(&mut self, max_tokens: u32) -> &mut Self {
        self.request.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(&mut self, top_p: f32) -> &mut Self {
        self.request.options.top_p = Some(top_p);
        self
    }

    pub fn frequency_penalty(&mut self, penalty: f32) -> &mut Self {
        self.request.options.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(&mut self, penalty: f32) -> &mut Self {
        self.request.options.presence_penalty = Some(penalty);
        self
    }

    /// Adds one stop sequence.
    pub fn stop(&mut self, sequence: impl Into<String>) -> &mut Self {
        self.request.options.stop.push(sequence.into());
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.request.options.seed = Some(seed);
        self
    }

    pub fn tool(&mut self, tool: Tool) -> &mut Self {
        self.request.tools.push(tool);
        self
    }

    pub fn tool_choice(&mut self, choice: ToolChoice) -> &mut Self {
        self.request.tool_choice = Some(choice);
        self
    }

    /// Asks for a JSON object answer.
    pub fn json(&mut self) -> &mut Self {
        self.response_format(ResponseFormat::Json)
    }

    pub fn response_format(&mut self, format: ResponseFormat) -> &mut Self {
        self.request.response_format = Some(format);
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn cancellation(&mut self, token: CancellationToken) -> &mut Self {
        self.request.cancellation = Some(token);
        self
    }

    /// Rough cost of sending the request as built, priced for the resolved model.
    ///
    /// Text weighs one token per four characters, each image a thousand tokens, and
    /// the answer `max_tokens` (a thousand when unset). Unknown models estimate zero.
    pub fn estimate_cost(&self) -> Cost {
        let model = self.client.resolve_alias(&self.request.model);
        estimate_request_cost(&model, &self.request)
    }

    /// Snapshot of the request accumulated so far.
    pub fn build(&self) -> ChatRequest {
        self.request.clone()
    }

    /// Dispatches through the client's retry and fallback policy.
    ///
    /// The primary model is validated first: an unknown model or missing credential
    /// fails before any network call.
    pub async fn send(&self) -> Result<ChatResult, AIError> {
        let request = self.validated()?;
        self.client.chat(request).await
    }

    /// Dispatches exactly once against the primary model.
    pub async fn send_once(&self) -> Result<ChatResult, AIError> {
        let request = self.validated()?;
        self.client.send_once(request).await
    }

    pub async fn stream(&self) -> Result<ChatStream, AIError> {
        let request = self.validated()?;
        self.client.stream(request).await
    }

    fn validated(&self) -> Result<ChatRequest, AIError> {
        let model = self.client.primary_model(&self.request)?;
        self.client.target(&model)?;
        Ok(self.request.clone())
    }

    fn push_user_part(&mut self, part: ContentPart) -> &mut Self {
        match self.request.messages.last_mut() {
            Some(message) if message.role == Role::User => message.push_part(part),
            _ => self
                .request
                .messages
                .push(ChatMessage::with_parts(Role::User, vec![part])),
        }
        self
    }
}
