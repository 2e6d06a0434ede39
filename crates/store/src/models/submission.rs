use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// A free-text description of a recording, as submitted by a listener's
/// client.
///
/// Missing fields deserialize as empty so that validation, not parsing,
/// decides whether a submission is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "artist")]
    pub artist_credit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}
impl Submission {
    pub fn new(title: impl Into<String>, artist_credit: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist_credit: artist_credit.into(),
            release: None,
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Check required fields and borrow the submission as a [`Triplet`].
    pub(crate) fn triplet(&self) -> Result<Triplet<'_>> {
        if self.title.is_empty() {
            exn::bail!(ErrorKind::BadData("submission requires a title"));
        }
        if self.artist_credit.is_empty() {
            exn::bail!(ErrorKind::BadData("submission requires an artist credit"));
        }
        Ok(Triplet {
            recording: &self.title,
            artist_credit: &self.artist_credit,
            // An absent release is the empty release, not a wildcard.
            release: self.release.as_deref().unwrap_or_default(),
        })
    }
}

/// A validated submission, borrowed with its original casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Triplet<'a> {
    pub(crate) recording: &'a str,
    pub(crate) artist_credit: &'a str,
    pub(crate) release: &'a str,
}
impl Triplet<'_> {
    /// The case-folded form used for matching and for the uniqueness
    /// constraint.
    pub(crate) fn key(&self) -> TripletKey {
        TripletKey {
            recording: self.recording.to_lowercase(),
            artist_credit: self.artist_credit.to_lowercase(),
            release: self.release.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TripletKey {
    pub(crate) recording: String,
    pub(crate) artist_credit: String,
    pub(crate) release: String,
}
