//! Question corpus and selection.
//!
//! The catalog is built once at startup and shared read-only; selection state
//! (which questions a player has already seen) lives in the `AskedStore`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rand::seq::IndexedRandom;

use crate::error::{QuizError, QuizResult};
use crate::models::question::Question;
use crate::repositories::AskedStore;

#[derive(Debug, Clone, Default)]
pub struct QuestionCatalog {
    by_id: HashMap<i64, Question>,
    by_difficulty: BTreeMap<u8, Vec<i64>>,
}

impl QuestionCatalog {
    pub fn new(questions: impl IntoIterator<Item = Question>) -> Self {
        let mut catalog = Self::default();
        for question in questions {
            let ids = catalog.by_difficulty.entry(question.difficulty).or_default();
            if !ids.contains(&question.id) {
                ids.push(question.id);
            }
            catalog.by_id.insert(question.id, question);
        }
        catalog
    }

    /// The ten stock questions, one per difficulty level.
    pub fn seeded() -> Self {
        let q = |id: i64, prompt: &str, options: [&str; 4], answer: &str| Question {
            id,
            difficulty: id as u8,
            prompt: prompt.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            answer_key: answer.to_string(),
        };

        Self::new([
            q(1, "What is the capital of France?", ["Berlin", "Paris", "Madrid", "Rome"], "B"),
            q(2, "Which planet is known as the Red Planet?", ["Earth", "Venus", "Mars", "Jupiter"], "C"),
            q(3, "What is 15 multiplied by 4?", ["50", "60", "70", "80"], "B"),
            q(4, "Which element has the chemical symbol 'O'?", ["Gold", "Silver", "Oxygen", "Iron"], "C"),
            q(5, "Who painted the Mona Lisa?", ["Van Gogh", "Picasso", "Da Vinci", "Monet"], "C"),
            q(6, "What is the square root of 144?", ["10", "11", "12", "14"], "C"),
            q(7, "Which continent is the Sahara Desert located in?", ["Asia", "Africa", "South America", "Australia"], "B"),
            q(8, "In what year did the Titanic sink?", ["1905", "1912", "1918", "1922"], "B"),
            q(9, "What is the largest organ in the human body?", ["Heart", "Liver", "Skin", "Lungs"], "C"),
            q(10, "Which physicist developed the theory of General Relativity?", ["Newton", "Bohr", "Einstein", "Hawking"], "C"),
        ])
    }

    pub fn get(&self, id: i64) -> Option<&Question> {
        self.by_id.get(&id)
    }

    pub fn at_difficulty(&self, difficulty: u8) -> Vec<&Question> {
        self.by_difficulty
            .get(&difficulty)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
pub trait QuestionProvider: Send + Sync {
    async fn get_question_by_id(&self, id: i64) -> Result<Option<Question>>;

    /// Picks a question at `difficulty`, preferring ones the user has not seen,
    /// and records that it was asked.
    async fn select_next_question(&self, user_id: i64, difficulty: u8) -> QuizResult<Question>;
}

pub struct CatalogQuestionProvider {
    catalog: Arc<QuestionCatalog>,
    asked: Arc<dyn AskedStore>,
}

impl CatalogQuestionProvider {
    pub fn new(catalog: Arc<QuestionCatalog>, asked: Arc<dyn AskedStore>) -> Self {
        Self { catalog, asked }
    }
}

#[async_trait]
impl QuestionProvider for CatalogQuestionProvider {
    async fn get_question_by_id(&self, id: i64) -> Result<Option<Question>> {
        Ok(self.catalog.get(id).cloned())
    }

    async fn select_next_question(&self, user_id: i64, difficulty: u8) -> QuizResult<Question> {
        let pool = self.catalog.at_difficulty(difficulty);
        if pool.is_empty() {
            return Err(QuizError::NoQuestionAvailable(difficulty));
        }

        let asked = match self.asked.asked_question_ids(user_id).await {
            Ok(asked) => asked,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load asked questions, selecting from full pool");
                Default::default()
            }
        };

        let unseen: Vec<&Question> = pool
            .iter()
            .copied()
            .filter(|q| !asked.contains(&q.id))
            .collect();
        let candidates = if unseen.is_empty() { &pool } else { &unseen };

        let question = {
            let mut rng = rand::rng();
            candidates
                .choose(&mut rng)
                .map(|q| (*q).clone())
                .ok_or(QuizError::NoQuestionAvailable(difficulty))?
        };

        if let Err(e) = self.asked.record_asked(user_id, question.id).await {
            tracing::warn!(user_id, question_id = question.id, error = %e, "Failed to record asked question");
        }

        Ok(question)
    }
}
