//! Gateway double that plays back queued results and records every call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ConversationContext, Gateway, GatewayError, Reply, SendOptions};
use crate::history::{Role, Turn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateContext { prior_turns: Vec<Turn> },
    Send { prompt: String, options: SendOptions },
    GenerateImages { prompt: String },
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<Reply, GatewayError>>,
    images: VecDeque<Result<Vec<String>, GatewayError>>,
    calls: Vec<Call>,
}

#[derive(Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        ScriptedGateway::default()
    }

    pub fn push_reply(&self, reply: Result<Reply, GatewayError>) {
        self.script.lock().unwrap().replies.push_back(reply);
    }

    pub fn push_text(&self, text: &str) {
        self.push_reply(Ok(Reply {
            text: text.to_string(),
            citations: Vec::new(),
        }));
    }

    pub fn push_images(&self, images: Result<Vec<String>, GatewayError>) {
        self.script.lock().unwrap().images.push_back(images);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Calls that reached the network, ignoring context construction.
    pub fn remote_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::CreateContext { .. }))
            .collect()
    }

    pub fn last_context_turns(&self) -> Option<Vec<Turn>> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::CreateContext { prior_turns } => Some(prior_turns),
            _ => None,
        })
    }
}

struct ScriptedContext {
    script: Arc<Mutex<Script>>,
    turns: Vec<Turn>,
}

#[async_trait]
impl ConversationContext for ScriptedContext {
    async fn send(&mut self, prompt: &str, options: SendOptions) -> Result<Reply, GatewayError> {
        let result = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(Call::Send {
                prompt: prompt.to_string(),
                options,
            });
            script
                .replies
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::generic("no scripted reply")))
        };

        if let Ok(reply) = &result {
            self.turns.push(Turn {
                role: Role::User,
                text: prompt.to_string(),
            });
            self.turns.push(Turn {
                role: Role::Model,
                text: reply.text.clone(),
            });
        }
        result
    }

    #[cfg(test)]
    fn turns(&self) -> &[Turn] {
        &self.turns
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn create_context(&self, prior_turns: Vec<Turn>) -> Box<dyn ConversationContext> {
        self.script.lock().unwrap().calls.push(Call::CreateContext {
            prior_turns: prior_turns.clone(),
        });
        Box::new(ScriptedContext {
            script: self.script.clone(),
            turns: prior_turns,
        })
    }

    async fn generate_images(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::GenerateImages {
            prompt: prompt.to_string(),
        });
        script
            .images
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::generic("no scripted images")))
    }
}
