use crate::recognition::{EngineFactory, NoRemote, Orchestrator};
use crate::translate::TranslationEngine;

pub(crate) type ServerOrchestrator<F> = Orchestrator<NoRemote, F, Box<dyn TranslationEngine>>;

pub(crate) struct ServerState<F: EngineFactory> {
    pub(crate) orchestrator: ServerOrchestrator<F>,
    pub(crate) tokens: Vec<String>,
}

impl<F: EngineFactory> ServerState<F> {
    pub(crate) fn accepts(&self, token: &str) -> bool {
        self.tokens.iter().any(|known| known == token)
    }
}
