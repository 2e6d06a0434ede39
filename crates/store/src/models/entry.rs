use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored submission and the identifier assigned to it.
///
/// Serializes to the shape consumed by the listen pipeline:
/// `{"msid": ..., "title": ..., "artist": ..., "release": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "msid")]
    pub id: Uuid,
    #[serde(rename = "title")]
    pub recording: String,
    #[serde(rename = "artist")]
    pub artist_credit: String,
    pub release: String,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    id: String,
    recording: String,
    artist_credit: String,
    release: String,
}
impl TryFrom<EntryRow> for Entry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).or_raise(|| ErrorKind::InvalidData("submission id"))?,
            recording: row.recording,
            artist_credit: row.artist_credit,
            release: row.release,
        })
    }
}
