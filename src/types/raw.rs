//! Typed decoding of the raw export formats.
//!
//! Holder exports store each cell as a Python-style dictionary literal
//! (`{'Address': '0xabc'}`, `{'Amount': '12.5'}`), and vote exports may
//! store the proposal as `{'id': '0x..'}`. These are decoded once, at read
//! time, into plain fields.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;

use super::models::Holder;

#[derive(Debug, Deserialize)]
struct AddressCell {
    #[serde(rename = "Address")]
    address: String,
}

#[derive(Debug, Deserialize)]
struct AmountCell {
    #[serde(rename = "Amount")]
    amount: NumberOrString,
}

#[derive(Debug, Deserialize)]
struct ProposalCell {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn to_f64(&self) -> Result<f64, String> {
        match self {
            NumberOrString::Number(n) => Ok(*n),
            NumberOrString::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid amount {:?}: {}", s, e)),
        }
    }
}

/// One row of a raw holder export.
#[derive(Debug, Deserialize)]
pub struct RawHolderRow {
    #[serde(rename = "Holder", deserialize_with = "address_cell")]
    pub address: String,
    #[serde(rename = "Balance", deserialize_with = "amount_cell")]
    pub amount: f64,
}

impl From<RawHolderRow> for Holder {
    fn from(row: RawHolderRow) -> Self {
        Holder { address: row.address, amount: row.amount }
    }
}

/// Parses a dictionary literal that uses single quotes.
pub fn parse_dict_literal<T: DeserializeOwned>(cell: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(&cell.replace('\'', "\""))
}

fn address_cell<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let cell = String::deserialize(deserializer)?;
    parse_dict_literal::<AddressCell>(&cell)
        .map(|c| c.address)
        .map_err(de::Error::custom)
}

fn amount_cell<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let cell = String::deserialize(deserializer)?;
    parse_dict_literal::<AmountCell>(&cell)
        .map_err(de::Error::custom)?
        .amount
        .to_f64()
        .map_err(de::Error::custom)
}

/// Accepts either a bare proposal id or a `{'id': ..}` literal.
pub fn proposal_ref<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let cell = String::deserialize(deserializer)?;
    let trimmed = cell.trim();
    if trimmed.starts_with('{') {
        parse_dict_literal::<ProposalCell>(trimmed)
            .map(|c| c.id)
            .map_err(de::Error::custom)
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::models::VoteRecord;

    #[test]
    fn test_raw_holder_row_decodes_dict_cells() {
        let data = "Holder,Balance\n\
                    \"{'Address': '0xAbC'}\",\"{'Amount': '12.5'}\"\n\
                    \"{'Address': '0xdef'}\",\"{'Amount': 3}\"\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<RawHolderRow> = reader.deserialize().collect::<Result<_, _>>().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].address, "0xAbC");
        assert_eq!(rows[0].amount, 12.5);
        assert_eq!(rows[1].amount, 3.0);
    }

    #[test]
    fn test_raw_holder_row_rejects_bad_amount() {
        let data = "Holder,Balance\n\"{'Address': '0x1'}\",\"{'Amount': 'lots'}\"\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let row: Result<RawHolderRow, _> = reader.deserialize().next().unwrap();
        assert!(row.is_err());
    }

    #[test]
    fn test_vote_proposal_column_variants() {
        let plain = "proposal_id,voter,token_id,created\n0xp1,0xv1,aave,1700000000\n";
        let mut reader = csv::Reader::from_reader(plain.as_bytes());
        let vote: VoteRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(vote.proposal_id, "0xp1");

        let dict = "proposal,voter,token_id,created\n\"{'id': '0xp2'}\",0xv1,aave,1700000000\n";
        let mut reader = csv::Reader::from_reader(dict.as_bytes());
        let vote: VoteRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(vote.proposal_id, "0xp2");
        assert_eq!(vote.created, 1_700_000_000);
    }
}
