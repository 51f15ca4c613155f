use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 1-indexed (row, column) cell address. Displays and serializes in A1 notation, e.g. `D7`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RowCol(pub u32, pub u32);

impl RowCol {
    pub const fn new(row: u32, col: u32) -> Self {
        Self(row, col)
    }

    pub fn row(&self) -> u32 {
        self.0
    }

    pub fn col(&self) -> u32 {
        self.1
    }

    /// Renders the address as `A1`-style text for use inside formulas.
    pub fn to_a1(&self) -> String {
        format!("{}{}", column_letter(self.1), self.0)
    }
}

/// Converts a 1-indexed column number to its spreadsheet letters: 1 -> `A`, 27 -> `AA`.
pub fn column_letter(col: u32) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

impl fmt::Display for RowCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

impl FromStr for RowCol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Expected format: "D7"
        let s = s.trim().to_ascii_uppercase();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| anyhow::anyhow!("Cell address must end in a row number, got: {s}"))?;
        let (letters, digits) = s.split_at(split);

        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_uppercase()) {
            anyhow::bail!("Cell address must start with column letters, got: {s}");
        }

        let col = letters
            .bytes()
            .try_fold(0u32, |acc, b| {
                acc.checked_mul(26)?.checked_add(u32::from(b - b'A' + 1))
            })
            .ok_or_else(|| anyhow::anyhow!("Column letters out of range, got: {s}"))?;
        let row = digits
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("Invalid row number: {e}"))?;
        if row == 0 {
            anyhow::bail!("Row numbers start at 1, got: {s}");
        }

        Ok(RowCol(row, col))
    }
}

impl Serialize for RowCol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RowCol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RowCol::from_str(&s).map_err(serde::de::Error::custom)
    }
}
