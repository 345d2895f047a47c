use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

// It is used by strum to convert the enum to a string
// but the compiler complains that it is unused
#[allow(unused_imports)]
use std::str::FromStr;

/// Ordered phases of a migration run.
/// ---
/// The stage is persisted after every transition,
/// a restarted coordinator resumes from the stored value.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Starting,
    CleanupBefore,
    IndependentVersionsLastRevs,
    DependentVersionsLastRevs,
    IndependentVersionsOldRevs,
    DependentVersionsOldRevs,
    ComparisonsOther,
    ComparisonsOnly,
    PostCheck,
    Done,
}

impl MigrationStage {
    /// First stage a freshly created run is persisted with.
    /// Changelog-only runs never allocate snapshots, so they
    /// start directly at the comparison stage.
    pub fn initial(changelog_only: bool) -> Self {
        if changelog_only {
            MigrationStage::ComparisonsOnly
        } else {
            MigrationStage::Starting
        }
    }

    /// Returns the stage following `self`, `None` once `Done`.
    pub fn next(self, changelog_only: bool) -> Option<Self> {
        use MigrationStage::*;

        let next = match self {
            Starting if changelog_only => ComparisonsOnly,
            Starting => CleanupBefore,
            CleanupBefore => IndependentVersionsLastRevs,
            IndependentVersionsLastRevs => DependentVersionsLastRevs,
            DependentVersionsLastRevs => IndependentVersionsOldRevs,
            IndependentVersionsOldRevs => DependentVersionsOldRevs,
            DependentVersionsOldRevs => ComparisonsOther,
            ComparisonsOther | ComparisonsOnly => PostCheck,
            PostCheck => Done,
            Done => return None,
        };

        Some(next)
    }

    pub fn is_done(self) -> bool {
        self == MigrationStage::Done
    }
}
