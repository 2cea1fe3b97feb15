use serde::{Deserialize, Serialize};

/// One logical operation a [`crate::model::Recipe`]'s adapter may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Completion,
    Embeddings,
    Reranking,
    AudioTranscription,
    SpeechSynthesis,
    ImageGeneration,
}

/// Logical operations the router forwards to a backend's `endpoint_map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ChatCompletion,
    Completion,
    Responses,
    Embeddings,
    Reranking,
    AudioTranscriptions,
    AudioSpeech,
    ImagesGenerations,
}

impl Operation {
    pub fn required_capability(self) -> Capability {
        match self {
            Operation::ChatCompletion | Operation::Completion | Operation::Responses => {
                Capability::Completion
            }
            Operation::Embeddings => Capability::Embeddings,
            Operation::Reranking => Capability::Reranking,
            Operation::AudioTranscriptions => Capability::AudioTranscription,
            Operation::AudioSpeech => Capability::SpeechSynthesis,
            Operation::ImagesGenerations => Capability::ImageGeneration,
        }
    }
}
