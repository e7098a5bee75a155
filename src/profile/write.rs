//! Profile artifact writing.

use serde::Serialize;
use serde::ser::{SerializeStruct as _, Serializer as _};

use std::path::Path;

use super::Profile;
use crate::TaskprofResult;

/// Serializes `profile` into a buffer sized from its marker count. Threads are
/// streamed one by one rather than collected into a `Value` first.
pub fn profile_to_vec(profile: &Profile) -> TaskprofResult<Vec<u8>> {
    let markers: usize = profile.threads.iter().map(|t| t.markers.len()).sum();
    let mut buf = Vec::with_capacity(4096 + markers.saturating_mul(256));
    {
        let mut ser = serde_json::Serializer::new(&mut buf);
        let mut doc = ser.serialize_struct("Profile", 4)?;
        doc.serialize_field("meta", &profile.meta)?;
        doc.serialize_field("libs", &profile.libs)?;
        doc.serialize_field("threads", &ThreadList(profile))?;
        doc.serialize_field("counters", &profile.counters)?;
        doc.end()?;
    }
    Ok(buf)
}

struct ThreadList<'a>(&'a Profile);

impl Serialize for ThreadList<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.threads.iter())
    }
}

pub fn write_profile(profile: &Profile, out_path: &Path) -> TaskprofResult<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out_path, profile_to_vec(profile)?)?;
    tracing::info!(
        path = %out_path.display(),
        threads = profile.threads.len(),
        "wrote profile"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProfileOptions, build_profile, model::fixtures::timed_group};

    #[test]
    fn written_profile_matches_direct_serialization() {
        let profile = build_profile(
            vec![timed_group("a", 0, 10), timed_group("b", 20, 30)],
            &ProfileOptions::default(),
        );
        let dir = std::env::temp_dir().join(format!("taskprof-write-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("profile.json");
        write_profile(&profile, &path).expect("write profile");

        let bytes = std::fs::read(&path).expect("read back");
        let written: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        let direct = serde_json::to_value(&profile).expect("serialize");
        assert_eq!(written, direct);
        assert_eq!(written["threads"].as_array().map(Vec::len), Some(2));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
