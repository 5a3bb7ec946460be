//! One-shot helpers available during an attempt.

use std::collections::BTreeMap;

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::models::quiz::Choice;

/// Share of the simulated audience that picks the correct choice.
pub const POLL_CORRECT_MIN: u32 = 55;
pub const POLL_CORRECT_MAX: u32 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifelineKind {
    #[serde(rename = "5050")]
    FiftyFifty,
    #[serde(rename = "ask_ai")]
    AskAi,
    #[serde(rename = "poll")]
    Poll,
}

impl LifelineKind {
    /// Key stored in `attempts.lifelines_used`.
    pub fn key(&self) -> &'static str {
        match self {
            LifelineKind::FiftyFifty => "5050",
            LifelineKind::AskAi => "ask_ai",
            LifelineKind::Poll => "poll",
        }
    }
}

pub fn already_used(used: &BTreeMap<String, bool>, kind: LifelineKind) -> bool {
    used.get(kind.key()).copied().unwrap_or(false)
}

/// Ids of two random incorrect choices, or all of them when fewer exist.
pub fn fifty_fifty<R: Rng + ?Sized>(choices: &[Choice], rng: &mut R) -> Vec<i64> {
    let incorrect: Vec<i64> = choices.iter().filter(|c| !c.is_correct).map(|c| c.id).collect();
    if incorrect.len() < 2 {
        return incorrect;
    }
    incorrect.choose_multiple(rng, 2).copied().collect()
}

/// Simulated audience percentages per choice id. Always sums to 100 when
/// the question has at least one incorrect choice.
pub fn simulated_poll<R: Rng + ?Sized>(choices: &[Choice], rng: &mut R) -> BTreeMap<i64, u32> {
    let mut poll = BTreeMap::new();
    let mut remaining = 100u32;

    if let Some(correct) = choices.iter().find(|c| c.is_correct) {
        let share = rng.gen_range(POLL_CORRECT_MIN..=POLL_CORRECT_MAX);
        poll.insert(correct.id, share);
        remaining -= share;
    }

    let incorrect: Vec<&Choice> = choices.iter().filter(|c| !c.is_correct).collect();
    for (i, choice) in incorrect.iter().enumerate() {
        let share = if i == incorrect.len() - 1 {
            remaining
        } else {
            rng.gen_range(0..=remaining)
        };
        remaining -= share;
        poll.insert(choice.id, share);
    }

    poll
}

pub fn hint_prompt(question: &str, choices: &[Choice]) -> String {
    let options = choices
        .iter()
        .map(|c| format!("- {}", c.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Question: {question}\nOptions:\n{options}\n\n\
         You are a \"Phone a Friend\" lifeline. Provide a helpful HINT. \
         Do NOT give the direct answer. Guide the user towards the correct concept. \
         Keep it under 30 words."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn choices(correct_at: usize, n: usize) -> Vec<Choice> {
        (0..n)
            .map(|i| Choice {
                id: i as i64 + 10,
                question_id: 1,
                text: format!("option {i}"),
                is_correct: i == correct_at,
            })
            .collect()
    }

    #[test]
    fn fifty_fifty_removes_two_incorrect() {
        let mut rng = StdRng::seed_from_u64(7);
        let cs = choices(1, 4);
        for _ in 0..20 {
            let removed = fifty_fifty(&cs, &mut rng);
            assert_eq!(removed.len(), 2);
            assert!(!removed.contains(&11));
            assert_ne!(removed[0], removed[1]);
        }
    }

    #[test]
    fn fifty_fifty_with_one_incorrect_removes_it() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(fifty_fifty(&choices(0, 2), &mut rng), vec![11]);
    }

    #[test]
    fn poll_sums_to_hundred_and_favours_correct() {
        let mut rng = StdRng::seed_from_u64(42);
        let cs = choices(2, 4);
        for _ in 0..50 {
            let poll = simulated_poll(&cs, &mut rng);
            assert_eq!(poll.len(), 4);
            assert_eq!(poll.values().sum::<u32>(), 100);
            let correct = poll[&12];
            assert!((POLL_CORRECT_MIN..=POLL_CORRECT_MAX).contains(&correct));
        }
    }

    #[test]
    fn lifeline_keys_match_wire_names() {
        let kind: LifelineKind = serde_json::from_str("\"5050\"").unwrap();
        assert_eq!(kind, LifelineKind::FiftyFifty);
        assert_eq!(LifelineKind::AskAi.key(), "ask_ai");

        let mut used = BTreeMap::new();
        used.insert("poll".to_string(), true);
        assert!(already_used(&used, LifelineKind::Poll));
        assert!(!already_used(&used, LifelineKind::FiftyFifty));
    }

    #[test]
    fn hint_prompt_lists_options() {
        let prompt = hint_prompt("What is 2+2?", &choices(0, 2));
        assert!(prompt.contains("- option 0\n- option 1"));
        assert!(prompt.contains("under 30 words"));
    }
}
