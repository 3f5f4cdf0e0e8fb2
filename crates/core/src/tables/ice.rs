//! Ice growth and ice–rain collection tables
//!
//! Both tables come from one versioned text file. After a `VERSION <x.y.z>`
//! header the body holds, for every (density, rime fraction) pair:
//!
//! 1. `ISIZE` ice records: two index columns, then 15 values of which all but
//!    columns 0, 1 and 10 are kept (12 properties);
//! 2. `ISIZE × RCOLLSIZE` collection records: two index columns, then 6
//!    values of which columns 3 and 4 are kept as base-10 logarithms.
//!
//! Tokens are whitespace separated; line breaks carry no meaning.

use crate::constants::{
    Real, COLLECT_TABLE_SIZE, DENSIZE, ICE_TABLE_SIZE, ISIZE, RCOLLSIZE, RIMSIZE,
};
use crate::error::{MicroError, MicroResult};
use std::path::Path;
use std::str::SplitWhitespace;
use tracing::debug;

/// Numeric columns in one ice growth record
pub const ICE_RECORD_VALUES: usize = 15;
/// Numeric columns in one collection record
pub const COLLECT_RECORD_VALUES: usize = 6;

/// Ice growth column that is read but not stored
const ICE_SKIPPED_COLUMN: usize = 10;
/// Collection columns stored (as log10)
const COLLECT_STORED_COLUMNS: [usize; COLLECT_TABLE_SIZE] = [3, 4];

/// Ice particle properties indexed `(density, rime, size, property)`
#[derive(Debug, Clone, PartialEq)]
pub struct IceGrowthTable {
    data: Vec<Real>,
}

impl IceGrowthTable {
    /// Total stored values
    pub const LEN: usize = DENSIZE * RIMSIZE * ISIZE * ICE_TABLE_SIZE;

    fn zeroed() -> Self {
        Self {
            data: vec![0.0; Self::LEN],
        }
    }

    #[inline]
    fn offset(dens: usize, rime: usize, size: usize, prop: usize) -> usize {
        assert!(
            dens < DENSIZE && rime < RIMSIZE && size < ISIZE && prop < ICE_TABLE_SIZE,
            "Ice table index out of bounds"
        );
        ((dens * RIMSIZE + rime) * ISIZE + size) * ICE_TABLE_SIZE + prop
    }

    /// Property `prop` for a density, rime fraction and size bin
    #[must_use]
    pub fn get(&self, dens: usize, rime: usize, size: usize, prop: usize) -> Real {
        self.data[Self::offset(dens, rime, size, prop)]
    }

    /// All values in index order
    #[must_use]
    pub fn as_slice(&self) -> &[Real] {
        &self.data
    }
}

/// Ice–rain collection properties indexed
/// `(density, rime, size, collector size, property)`, stored as log10
#[derive(Debug, Clone, PartialEq)]
pub struct IceCollectionTable {
    data: Vec<Real>,
}

impl IceCollectionTable {
    /// Total stored values
    pub const LEN: usize = DENSIZE * RIMSIZE * ISIZE * RCOLLSIZE * COLLECT_TABLE_SIZE;

    fn zeroed() -> Self {
        Self {
            data: vec![0.0; Self::LEN],
        }
    }

    #[inline]
    fn offset(dens: usize, rime: usize, size: usize, collector: usize, prop: usize) -> usize {
        assert!(
            dens < DENSIZE
                && rime < RIMSIZE
                && size < ISIZE
                && collector < RCOLLSIZE
                && prop < COLLECT_TABLE_SIZE,
            "Collection table index out of bounds"
        );
        (((dens * RIMSIZE + rime) * ISIZE + size) * RCOLLSIZE + collector) * COLLECT_TABLE_SIZE
            + prop
    }

    /// log10 of property `prop` for a bin combination
    #[must_use]
    pub fn get(&self, dens: usize, rime: usize, size: usize, collector: usize, prop: usize) -> Real {
        self.data[Self::offset(dens, rime, size, collector, prop)]
    }

    /// All values in index order
    #[must_use]
    pub fn as_slice(&self) -> &[Real] {
        &self.data
    }
}

/// Both ice tables, loaded together.
#[derive(Debug, Clone, PartialEq)]
pub struct IceTables {
    /// Ice growth table
    pub growth: IceGrowthTable,
    /// Ice–rain collection table
    pub collection: IceCollectionTable,
}

/// Whitespace tokenizer that remembers how far it got for error messages.
struct TokenReader<'a> {
    tokens: SplitWhitespace<'a>,
    consumed: usize,
    source_name: &'a str,
}

impl<'a> TokenReader<'a> {
    fn new(content: &'a str, source_name: &'a str) -> Self {
        Self {
            tokens: content.split_whitespace(),
            consumed: 0,
            source_name,
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let token = self.tokens.next()?;
        self.consumed += 1;
        Some(token)
    }

    fn require_token(&mut self) -> MicroResult<&'a str> {
        self.next_token().ok_or_else(|| MicroError::UnexpectedEof {
            source_name: self.source_name.to_string(),
            consumed: self.consumed,
        })
    }

    fn invalid(&self, token: &str) -> MicroError {
        MicroError::InvalidNumber {
            source_name: self.source_name.to_string(),
            position: self.consumed,
            token: token.to_string(),
        }
    }

    fn next_real(&mut self) -> MicroResult<Real> {
        let token = self.require_token()?;
        token.parse::<Real>().map_err(|_| self.invalid(token))
    }

    /// Read and discard the two bin-index columns that start each record
    fn skip_indices(&mut self) -> MicroResult<()> {
        for _ in 0..2 {
            let token = self.require_token()?;
            token.parse::<i64>().map_err(|_| self.invalid(token))?;
        }
        Ok(())
    }
}

impl IceTables {
    /// Load the ice tables from a file.
    ///
    /// # Errors
    ///
    /// Returns `TableIo` if the file cannot be read, and any error from
    /// [`IceTables::parse`]
    pub fn load(path: &Path, expected_version: &str) -> MicroResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| MicroError::TableIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, expected_version, &path.display().to_string())
    }

    /// Parse ice tables from file contents.
    ///
    /// Tables are only returned once every record has been read; a failure
    /// part way through leaves nothing behind.
    ///
    /// # Arguments
    ///
    /// * `content` - Full text of the table file
    /// * `expected_version` - Version that must follow the `VERSION` token
    /// * `source_name` - Name used in error messages
    ///
    /// # Errors
    ///
    /// Returns `MissingVersionHeader` or `VersionMismatch` for a bad header,
    /// `UnexpectedEof` for a truncated body and `InvalidNumber` for
    /// unparseable tokens
    pub fn parse(content: &str, expected_version: &str, source_name: &str) -> MicroResult<Self> {
        let mut reader = TokenReader::new(content, source_name);

        let header = reader.next_token().unwrap_or_default();
        if header != "VERSION" {
            return Err(MicroError::MissingVersionHeader {
                source_name: source_name.to_string(),
                found: header.to_string(),
            });
        }
        let version = reader.next_token().unwrap_or_default();
        if version != expected_version {
            return Err(MicroError::VersionMismatch {
                source_name: source_name.to_string(),
                expected: expected_version.to_string(),
                found: version.to_string(),
            });
        }

        let mut growth = IceGrowthTable::zeroed();
        let mut collection = IceCollectionTable::zeroed();

        for dens in 0..DENSIZE {
            for rime in 0..RIMSIZE {
                for size in 0..ISIZE {
                    reader.skip_indices()?;
                    let mut prop = 0;
                    for column in 0..ICE_RECORD_VALUES {
                        let value = reader.next_real()?;
                        if column > 1 && column != ICE_SKIPPED_COLUMN {
                            growth.data[IceGrowthTable::offset(dens, rime, size, prop)] = value;
                            prop += 1;
                        }
                    }
                }

                for size in 0..ISIZE {
                    for collector in 0..RCOLLSIZE {
                        reader.skip_indices()?;
                        let mut prop = 0;
                        for column in 0..COLLECT_RECORD_VALUES {
                            let value = reader.next_real()?;
                            if COLLECT_STORED_COLUMNS.contains(&column) {
                                let idx =
                                    IceCollectionTable::offset(dens, rime, size, collector, prop);
                                collection.data[idx] = value.log10();
                                prop += 1;
                            }
                        }
                    }
                }
            }
        }

        debug!(
            "Read {} ice records and {} collection records from {}",
            DENSIZE * RIMSIZE * ISIZE,
            DENSIZE * RIMSIZE * ISIZE * RCOLLSIZE,
            source_name
        );

        Ok(Self { growth, collection })
    }
}

/// Value written for an ice growth column in synthetic test tables
#[cfg(test)]
pub(crate) fn synthetic_ice_value(dens: usize, rime: usize, size: usize, column: usize) -> Real {
    ((((dens * RIMSIZE + rime) * ISIZE + size) * ICE_RECORD_VALUES + column) + 1) as Real
}

/// Value written for a collection column in synthetic test tables
#[cfg(test)]
pub(crate) fn synthetic_collect_value(
    dens: usize,
    rime: usize,
    size: usize,
    collector: usize,
    column: usize,
) -> Real {
    (((((dens * RIMSIZE + rime) * ISIZE + size) * RCOLLSIZE + collector)
        * COLLECT_RECORD_VALUES
        + column)
        + 1) as Real
}

/// Build a complete table file whose values encode their own position
#[cfg(test)]
pub(crate) fn create_synthetic_table(version: &str) -> String {
    use std::fmt::Write as _;

    let mut out = format!("VERSION {version}\n");
    for dens in 0..DENSIZE {
        for rime in 0..RIMSIZE {
            for size in 0..ISIZE {
                let _ = write!(out, "{} {}", dens + 1, size + 1);
                for column in 0..ICE_RECORD_VALUES {
                    let _ = write!(out, " {}", synthetic_ice_value(dens, rime, size, column));
                }
                out.push('\n');
            }
            for size in 0..ISIZE {
                for collector in 0..RCOLLSIZE {
                    let _ = write!(out, "{} {}", size + 1, collector + 1);
                    for column in 0..COLLECT_RECORD_VALUES {
                        let value = synthetic_collect_value(dens, rime, size, collector, column);
                        let _ = write!(out, " {value}");
                    }
                    out.push('\n');
                }
            }
        }
    }
    out
}
