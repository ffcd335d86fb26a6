use crate::embeddings::Embedder;
use crate::traits::{LanguageModel, VectorIndex};
use crate::{Answer, QueryFailure, QueryOptions, QueryResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PROMPT_TEMPLATE: &str = "
Answer the question based only on the following context:

{context}

---

Answer the question based on the above context: {question}
";

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Shown instead of the failure detail under [`ErrorExposure::Generic`].
pub const GENERIC_FAILURE_ANSWER: &str = "Error processing question.";

/// How much of a [`QueryFailure`] reaches the person asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorExposure {
    Verbatim,
    #[default]
    Generic,
}

impl ErrorExposure {
    pub fn describe(self, failure: &QueryFailure) -> String {
        match self {
            ErrorExposure::Verbatim => failure.to_string(),
            ErrorExposure::Generic => GENERIC_FAILURE_ANSWER.to_string(),
        }
    }
}

impl QueryResult {
    pub fn from_outcome(
        question: impl Into<String>,
        outcome: Result<Answer, QueryFailure>,
        exposure: ErrorExposure,
    ) -> Self {
        let answer = match outcome {
            Ok(answer) => answer.into_text(),
            Err(failure) => exposure.describe(&failure),
        };
        Self {
            question: question.into(),
            answer,
        }
    }
}

pub fn build_prompt(contexts: &[&str], question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", &contexts.join(CONTEXT_SEPARATOR))
        .replace("{question}", question)
}

/// Retrieval-augmented answering over a [`VectorIndex`].
#[derive(Clone)]
pub struct QueryEngine {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    options: QueryOptions,
}

impl QueryEngine {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        options: QueryOptions,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            options,
        }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, QueryFailure> {
        if question.trim().is_empty() {
            return Err(QueryFailure::EmptyQuestion);
        }

        let query_vector = self.embedder.embed_query(question).await?;
        let hits = self
            .index
            .similarity_search(&query_vector, self.options.top_k)
            .await?;
        debug!(hits = hits.len(), "retrieved context");

        if hits.is_empty() {
            info!("no relevant context found for the query");
            return Ok(Answer::NoContext);
        }

        let contexts: Vec<&str> = hits.iter().map(|hit| hit.text.as_str()).collect();
        let prompt = build_prompt(&contexts, question);
        let text = self
            .model
            .generate(&prompt, self.options.temperature)
            .await?;

        Ok(Answer::Generated(text))
    }

    /// Answers the first `max_questions` questions one after another. A
    /// failing question only affects its own result.
    pub async fn answer_all(
        &self,
        questions: &[String],
        exposure: ErrorExposure,
    ) -> Vec<QueryResult> {
        let mut results = Vec::new();
        for (position, question) in questions
            .iter()
            .take(self.options.max_questions)
            .enumerate()
        {
            info!(number = position + 1, "processing question");
            let outcome = self.answer(question).await;
            if let Err(failure) = &outcome {
                warn!(number = position + 1, %failure, "question failed");
            }
            results.push(QueryResult::from_outcome(question.clone(), outcome, exposure));
        }
        results
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{EmbedError, GenerationError};
    use crate::identifiers::assign_chunk_ids;
    use crate::indexer::tests::RecordingIndex;
    use crate::indexer::IncrementalIndexer;
    use crate::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct ScriptedModel {
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
        pub fail: bool,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(
            &self,
            prompt: &str,
            temperature: f32,
        ) -> Result<String, GenerationError> {
            assert_eq!(temperature, 0.0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                Err(GenerationError::Endpoint {
                    status: 503,
                    body: "model overloaded".to_string(),
                })
            } else {
                Ok("Generated answer".to_string())
            }
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        fn model_id(&self) -> String {
            "broken".to_string()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::CountMismatch {
                expected: texts.len(),
                actual: 0,
            })
        }
    }

    pub(crate) fn engine(index: Arc<RecordingIndex>, model: Arc<ScriptedModel>) -> QueryEngine {
        QueryEngine::new(
            index,
            Arc::new(CharacterNgramEmbedder::default()),
            model,
            QueryOptions::default(),
        )
    }

    pub(crate) async fn seeded_index(texts: &[&str]) -> Arc<RecordingIndex> {
        let index = Arc::new(RecordingIndex::default());
        let chunks = assign_chunk_ids(
            texts
                .iter()
                .map(|text| Chunk::new("data/book.pdf.txt", 0, *text))
                .collect(),
        );
        IncrementalIndexer::new(index.clone(), Arc::new(CharacterNgramEmbedder::default()), 100)
            .upsert(&chunks)
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn empty_index_returns_sentinel_without_calling_model() {
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(Arc::new(RecordingIndex::default()), model.clone());

        let answer = engine.answer("What is a cell?").await.unwrap();

        assert_eq!(answer, Answer::NoContext);
        assert_eq!(answer.text(), "No relevant context found.");
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn prompt_embeds_context_and_question() {
        let index = seeded_index(&["Cells divide by mitosis.", "DNA stores genes."]).await;
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(index, model.clone());

        let answer = engine.answer("How do cells divide?").await.unwrap();

        assert_eq!(answer, Answer::Generated("Generated answer".to_string()));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Cells divide by mitosis.\n\n---\n\nDNA stores genes."));
        assert!(prompts[0].contains("based on the above context: How do cells divide?"));
    }

    #[tokio::test]
    async fn retrieval_is_capped_at_top_k() {
        let texts: Vec<String> = (0..8).map(|i| format!("fact number {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(seeded_index(&refs).await, model.clone());

        engine.answer("which fact?").await.unwrap();

        // Five contexts need four separators; the template adds one more.
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0].matches(CONTEXT_SEPARATOR).count(), 5);
    }

    #[tokio::test]
    async fn generation_failure_is_typed() {
        let model = Arc::new(ScriptedModel {
            fail: true,
            ..ScriptedModel::default()
        });
        let engine = engine(seeded_index(&["Some context"]).await, model);

        let failure = engine.answer("Anything?").await.unwrap_err();
        assert!(matches!(failure, QueryFailure::Generation(_)));
    }

    #[tokio::test]
    async fn embedding_failure_is_typed() {
        let engine = QueryEngine::new(
            Arc::new(RecordingIndex::default()),
            Arc::new(BrokenEmbedder),
            Arc::new(ScriptedModel::default()),
            QueryOptions::default(),
        );
        assert!(matches!(
            engine.answer("Anything?").await,
            Err(QueryFailure::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn question_reaches_prompt_verbatim() {
        let model = Arc::new(ScriptedModel::default());
        let engine = engine(seeded_index(&["Heat flows from hot to cold."]).await, model.clone());

        engine.answer("\n2. What is heat?").await.unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("based on the above context: \n2. What is heat?"));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let engine = engine(Arc::new(RecordingIndex::default()), Arc::default());
        assert!(matches!(engine.answer("   ").await, Err(QueryFailure::EmptyQuestion)));
    }

    #[tokio::test]
    async fn batch_degrades_per_question_and_caps_at_twenty() {
        let model = Arc::new(ScriptedModel {
            fail: true,
            ..ScriptedModel::default()
        });
        let engine = engine(seeded_index(&["context"]).await, model.clone());
        let questions: Vec<String> = (0..25).map(|i| format!("Question {i}?")).collect();

        let generic = engine.answer_all(&questions, ErrorExposure::Generic).await;
        assert_eq!(generic.len(), 20);
        assert!(generic.iter().all(|result| result.answer == GENERIC_FAILURE_ANSWER));
        assert_eq!(model.calls.load(Ordering::SeqCst), 20);

        let verbatim = engine.answer_all(&questions[..1], ErrorExposure::Verbatim).await;
        assert!(verbatim[0].answer.contains("model overloaded"));
        assert_eq!(verbatim[0].question, "Question 0?");
    }
}
