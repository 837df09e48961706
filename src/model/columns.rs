use serde::{Deserialize, Serialize};

/// Number of slots per column family on every wide table.
pub const SLOTS: usize = 8;

/// The generic column bag shared by all persisted entity kinds: eight
/// integer, eight float and eight text slots. The state value sits next to
/// the bag on each row.
///
/// This shape is the compatibility contract of the strategy plugin
/// ecosystem. The store assigns no meaning to any slot; only the strategy
/// configured for a concrete type may interpret them, and a slot must never
/// be reassigned once a type has shipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericColumns {
    pub integers: [i64; SLOTS],
    pub floats: [f64; SLOTS],
    pub texts: [Option<String>; SLOTS],
}

impl GenericColumns {
    pub fn integer(&self, slot: u8) -> i64 {
        self.integers[slot as usize]
    }

    pub fn set_integer(&mut self, slot: u8, value: i64) {
        self.integers[slot as usize] = value;
    }

    pub fn float(&self, slot: u8) -> f64 {
        self.floats[slot as usize]
    }

    pub fn set_float(&mut self, slot: u8, value: f64) {
        self.floats[slot as usize] = value;
    }

    pub fn text(&self, slot: u8) -> Option<&str> {
        self.texts[slot as usize].as_deref()
    }

    pub fn set_text(&mut self, slot: u8, value: Option<String>) {
        self.texts[slot as usize] = value;
    }
}

/// Address of a single generic column slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRef {
    Integer(u8),
    Float(u8),
    Text(u8),
}

impl ColumnRef {
    /// SQL column name of this slot on a wide table (`integer1`..`text8`).
    pub fn column_name(&self) -> String {
        match self {
            ColumnRef::Integer(slot) => format!("integer{}", slot + 1),
            ColumnRef::Float(slot) => format!("float{}", slot + 1),
            ColumnRef::Text(slot) => format!("text{}", slot + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_accessors_round_trip() {
        let mut columns = GenericColumns::default();
        columns.set_integer(0, 7);
        columns.set_float(3, 2.5);
        columns.set_text(7, Some("T-7".into()));

        assert_eq!(columns.integer(0), 7);
        assert_eq!(columns.float(3), 2.5);
        assert_eq!(columns.text(7), Some("T-7"));
        assert_eq!(columns.text(0), None);
    }

    #[test]
    fn column_names_are_one_based() {
        assert_eq!(ColumnRef::Integer(0).column_name(), "integer1");
        assert_eq!(ColumnRef::Text(7).column_name(), "text8");
    }
}
