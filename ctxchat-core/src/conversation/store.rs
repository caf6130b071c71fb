use serde::{Deserialize, Serialize};

/// One user prompt together with its paired model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_input: String,
    pub response: String,
}

impl Turn {
    pub fn new(user_input: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            response: response.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("turn index {index} out of range (history has {len} turns)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid history payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Ordered sequence of turns, indexed positionally.
///
/// Callers must serialize mutating operations; slot indices in the token
/// cache are only valid while no other mutation interleaves.
#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    turns: Vec<Turn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn get(&self, index: usize) -> Result<&Turn, HistoryError> {
        self.turns
            .get(index)
            .ok_or(HistoryError::IndexOutOfRange {
                index,
                len: self.turns.len(),
            })
    }

    pub fn set_user_input(
        &mut self,
        index: usize,
        text: impl Into<String>,
    ) -> Result<(), HistoryError> {
        let len = self.turns.len();
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(HistoryError::IndexOutOfRange { index, len })?;
        turn.user_input = text.into();
        Ok(())
    }

    pub fn set_response(
        &mut self,
        index: usize,
        text: impl Into<String>,
    ) -> Result<(), HistoryError> {
        let len = self.turns.len();
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(HistoryError::IndexOutOfRange { index, len })?;
        turn.response = text.into();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Turn, HistoryError> {
        if index >= self.turns.len() {
            return Err(HistoryError::IndexOutOfRange {
                index,
                len: self.turns.len(),
            });
        }
        Ok(self.turns.remove(index))
    }

    pub fn replace_all(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    /// The full turn sequence as a JSON array.
    pub fn export_json(&self) -> Result<String, HistoryError> {
        Ok(serde_json::to_string(&self.turns)?)
    }

    /// Parse a previously exported turn sequence.
    pub fn import_json(raw: &str) -> Result<Vec<Turn>, HistoryError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with(n: usize) -> ConversationStore {
        let mut store = ConversationStore::new();
        for i in 0..n {
            store.append(Turn::new(format!("q{i}"), format!("a{i}")));
        }
        store
    }

    #[test]
    fn out_of_range_indices_yield_typed_errors() {
        let mut store = store_with(2);
        assert!(matches!(
            store.get(2),
            Err(HistoryError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(store.set_user_input(5, "x").is_err());
        assert!(store.set_response(5, "x").is_err());
        assert!(store.remove(5).is_err());
    }

    #[test]
    fn remove_shifts_later_turns_down() {
        let mut store = store_with(3);
        let removed = store.remove(1).expect("index in range");
        assert_eq!(removed.user_input, "q1");
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().user_input, "q2");
    }

    #[test]
    fn export_import_round_trips() {
        let store = store_with(2);
        let raw = store.export_json().expect("export");
        let turns = ConversationStore::import_json(&raw).expect("import");
        assert_eq!(turns, store.turns());
    }

    #[test]
    fn import_rejects_malformed_payloads() {
        assert!(matches!(
            ConversationStore::import_json("not json"),
            Err(HistoryError::InvalidPayload(_))
        ));
    }
}
