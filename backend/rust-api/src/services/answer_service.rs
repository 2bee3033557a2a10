use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::progression;
use super::user_service::UserService;
use crate::error::{QuizError, QuizResult};
use crate::metrics::{record_secondary_failure, ANSWERS_SUBMITTED_TOTAL, DUPLICATE_ANSWERS_TOTAL};
use crate::models::answer::AnswerOutcome;
use crate::models::user::UserState;
use crate::questions::QuestionProvider;
use crate::repositories::{DuplicateGuard, SecondarySync, UserStore};

/// The answer submission pipeline.
///
/// The store write is the commit point: anything before it leaves no trace,
/// anything after it (cache, rank index, duplicate guard) is best-effort.
pub struct AnswerService {
    users: Arc<UserService>,
    store: Arc<dyn UserStore>,
    guard: Arc<dyn DuplicateGuard>,
    questions: Arc<dyn QuestionProvider>,
    secondary: Arc<dyn SecondarySync>,
    propagation_timeout: Duration,
}

impl AnswerService {
    pub fn new(
        users: Arc<UserService>,
        store: Arc<dyn UserStore>,
        guard: Arc<dyn DuplicateGuard>,
        questions: Arc<dyn QuestionProvider>,
        secondary: Arc<dyn SecondarySync>,
        propagation_timeout: Duration,
    ) -> Self {
        Self {
            users,
            store,
            guard,
            questions,
            secondary,
            propagation_timeout,
        }
    }

    pub async fn submit_answer(
        &self,
        user_id: i64,
        question_id: i64,
        answer: &str,
    ) -> QuizResult<AnswerOutcome> {
        tracing::info!(
            "Processing answer submission: user={}, question={}",
            user_id,
            question_id
        );

        let now = Utc::now();
        let (user, last_answered) =
            tokio::join!(self.users.load(user_id), self.guard.last_answered(user_id));
        let mut user = self.users.settle_decay(user?, now).await?;

        let duplicate = match last_answered {
            Ok(last) => last == Some(question_id),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Duplicate guard read failed, assuming no duplicate");
                false
            }
        };
        if duplicate {
            DUPLICATE_ANSWERS_TOTAL.inc();
            tracing::info!(user_id, question_id, "Duplicate submission ignored");
            return Err(QuizError::DuplicateAnswer);
        }

        let question = match self.questions.get_question_by_id(question_id).await {
            Ok(Some(question)) => question,
            Ok(None) => return Err(QuizError::QuestionNotFound(question_id)),
            Err(e) => {
                tracing::warn!(question_id, error = %e, "Question lookup failed");
                return Err(QuizError::QuestionNotFound(question_id));
            }
        };

        let correct = question.is_correct(answer);
        let score_delta = progression::apply_answer(&mut user, question.difficulty, correct, now);

        // commit point
        self.store.save(&user).await?;

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if correct { "true" } else { "false" }])
            .inc();

        self.propagate(&user, question_id).await;

        tracing::info!(
            user_id,
            question_id,
            correct,
            score_delta,
            score = user.score,
            streak = user.streak,
            difficulty = user.current_difficulty,
            "Answer recorded"
        );

        Ok(AnswerOutcome {
            correct,
            score_delta,
            user,
        })
    }

    /// Pushes the stored state to the secondary structures and waits a bounded
    /// time for it. A batch still running at the deadline finishes on its own
    /// and reports its failures when it does.
    async fn propagate(&self, user: &UserState, question_id: i64) {
        let secondary = self.secondary.clone();
        let snapshot = user.clone();
        let batch = tokio::spawn(async move {
            let report = secondary.propagate(&snapshot, question_id).await;
            if report.is_clean() {
                tracing::debug!(user_id = snapshot.id, "Secondary structures refreshed");
                return;
            }
            for (target, reason) in &report.failures {
                record_secondary_failure(target.as_str());
                tracing::warn!(
                    user_id = snapshot.id,
                    %target,
                    error = %reason,
                    "Secondary propagation failed"
                );
            }
        });

        match tokio::time::timeout(self.propagation_timeout, batch).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(user_id = user.id, error = %e, "Secondary propagation task panicked");
            }
            Err(_) => {
                tracing::warn!(
                    user_id = user.id,
                    timeout_ms = self.propagation_timeout.as_millis() as u64,
                    "Secondary propagation still running at deadline"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::Config;
    use crate::models::leaderboard::RankMetric;
    use crate::questions::{CatalogQuestionProvider, QuestionCatalog};
    use crate::repositories::memory::MemoryBackends;
    use crate::repositories::{PropagationReport, RankIndex};

    fn service(backends: &MemoryBackends) -> AnswerService {
        let config = Config::default();
        service_with(
            backends,
            backends.secondary_sync(),
            config.quiz.propagation_timeout(),
        )
    }

    fn service_with(
        backends: &MemoryBackends,
        secondary: Arc<dyn SecondarySync>,
        propagation_timeout: Duration,
    ) -> AnswerService {
        let config = Config::default();
        let users = Arc::new(UserService::new(
            backends.store.clone(),
            backends.cache.clone(),
            config.quiz.streak_decay_window(),
        ));
        let provider = Arc::new(CatalogQuestionProvider::new(
            Arc::new(QuestionCatalog::seeded()),
            backends.asked.clone(),
        ));
        AnswerService::new(
            users,
            backends.store.clone(),
            backends.guard.clone(),
            provider,
            secondary,
            propagation_timeout,
        )
    }

    /// Finishes well after the propagation deadline.
    struct SlowSync {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SecondarySync for SlowSync {
        async fn propagate(&self, _user: &UserState, _question_id: i64) -> PropagationReport {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            PropagationReport::default()
        }
    }

    struct PanickingSync;

    #[async_trait]
    impl SecondarySync for PanickingSync {
        async fn propagate(&self, _user: &UserState, _question_id: i64) -> PropagationReport {
            panic!("secondary batch blew up");
        }
    }

    #[tokio::test]
    async fn correct_answer_updates_every_structure() {
        let backends = MemoryBackends::new(&Config::default());
        let mut user = UserState::new(1);
        user.current_difficulty = 3;
        backends.store.insert(user).await;
        let answers = service(&backends);

        let outcome = answers.submit_answer(1, 3, "B").await.unwrap();

        assert!(outcome.correct);
        assert_eq!(outcome.score_delta, 49);
        assert_eq!(outcome.user.current_difficulty, 4);
        assert_eq!(backends.store.find(1).await.unwrap().unwrap().score, 49);
        assert_eq!(backends.cache.peek(1).await.unwrap().score, 49);
        assert_eq!(backends.index.rank_of(RankMetric::Score, 1).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn unknown_question_leaves_state_untouched() {
        let backends = MemoryBackends::new(&Config::default());
        let answers = service(&backends);

        let err = answers.submit_answer(1, 999, "A").await.unwrap_err();

        assert!(matches!(err, QuizError::QuestionNotFound(999)));
        assert_eq!(backends.store.save_count(), 0);
    }

    #[tokio::test]
    async fn answer_comparison_is_case_sensitive() {
        let backends = MemoryBackends::new(&Config::default());
        let answers = service(&backends);

        let outcome = answers.submit_answer(1, 1, "b").await.unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.score_delta, 0);
    }

    #[tokio::test]
    async fn slow_propagation_does_not_hold_the_response() {
        let backends = MemoryBackends::new(&Config::default());
        let finished = Arc::new(AtomicBool::new(false));
        let slow = Arc::new(SlowSync {
            delay: Duration::from_millis(400),
            finished: finished.clone(),
        });
        let answers = service_with(&backends, slow, Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        let outcome = answers.submit_answer(1, 1, "B").await.unwrap();
        let waited = started.elapsed();

        assert!(outcome.correct);
        assert!(waited < Duration::from_millis(300), "waited {:?}", waited);
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(backends.store.find(1).await.unwrap().unwrap().score, 16);

        // the detached batch still runs to completion
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_propagation_keeps_the_committed_answer() {
        let backends = MemoryBackends::new(&Config::default());
        let answers = service_with(&backends, Arc::new(PanickingSync), Duration::from_millis(50));

        let outcome = answers.submit_answer(1, 1, "B").await.unwrap();

        assert!(outcome.correct);
        assert_eq!(backends.store.find(1).await.unwrap().unwrap().score, 16);
        assert_eq!(backends.guard.last_answered(1).await.unwrap(), None);
    }
}
