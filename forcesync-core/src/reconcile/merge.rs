/*
    merge.rs - Whole-force last-writer-wins

    Two copies of the same force are ranked purely by their timestamp.
    No field-level merge happens: the older copy is discarded wholesale.
    A missing timestamp counts as the epoch, and a copy without an
    instance id has never been replicated so it cannot be the remote side.
*/

use crate::model::ForceSnapshot;

/// Which side of a local/remote comparison should be kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Pick the copy to keep. Equal timestamps keep the local copy.
pub fn pick_latest(local: Option<&ForceSnapshot>, remote: Option<&ForceSnapshot>) -> Option<Winner> {
    let remote = remote.filter(|r| r.instance_id.is_some());
    match (local, remote) {
        (None, None) => None,
        (Some(_), None) => Some(Winner::Local),
        (None, Some(_)) => Some(Winner::Remote),
        (Some(local), Some(remote)) => {
            if remote.timestamp_millis() > local.timestamp_millis() {
                Some(Winner::Remote)
            } else {
                Some(Winner::Local)
            }
        }
    }
}

/// The later of two snapshots; `a` on a tie
pub fn reconcile<'a>(a: &'a ForceSnapshot, b: &'a ForceSnapshot) -> &'a ForceSnapshot {
    if b.timestamp_millis() > a.timestamp_millis() {
        b
    } else {
        a
    }
}

/// True when `candidate` should replace `current`
pub fn is_newer(candidate: &ForceSnapshot, current: &ForceSnapshot) -> bool {
    candidate.timestamp_millis() > current.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ForceId;
    use serde_json::json;

    fn snapshot(id: Option<&str>, timestamp: Option<&str>) -> ForceSnapshot {
        let mut value = json!({ "name": "Lance" });
        if let Some(id) = id {
            value["instanceId"] = json!(id);
        }
        if let Some(ts) = timestamp {
            value["timestamp"] = json!(ts);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_later_timestamp_wins_both_orders() {
        let older = snapshot(Some("f"), Some("2024-01-01T00:00:00.000Z"));
        let newer = snapshot(Some("f"), Some("2024-01-01T00:00:00.001Z"));

        assert_eq!(reconcile(&older, &newer), &newer);
        assert_eq!(reconcile(&newer, &older), &newer);
        assert_eq!(pick_latest(Some(&older), Some(&newer)), Some(Winner::Remote));
        assert_eq!(pick_latest(Some(&newer), Some(&older)), Some(Winner::Local));
    }

    #[test]
    fn test_missing_timestamp_loses() {
        let bare = snapshot(Some("f"), None);
        let dated = snapshot(Some("f"), Some("1999-12-31T23:59:59.000Z"));
        assert_eq!(reconcile(&bare, &dated), &dated);
        assert_eq!(reconcile(&dated, &bare), &dated);
    }

    #[test]
    fn test_tie_keeps_local() {
        let local = snapshot(Some("f"), Some("2024-06-01T00:00:00.000Z"));
        let mut remote = local.clone();
        remote.name = "Remote".to_string();
        assert_eq!(pick_latest(Some(&local), Some(&remote)), Some(Winner::Local));
    }

    #[test]
    fn test_remote_without_identity_is_ignored() {
        let local = snapshot(Some("f"), Some("2020-01-01T00:00:00.000Z"));
        let remote = snapshot(None, Some("2030-01-01T00:00:00.000Z"));
        assert_eq!(pick_latest(Some(&local), Some(&remote)), Some(Winner::Local));
        assert_eq!(pick_latest(None, Some(&remote)), None);
    }

    #[test]
    fn test_one_sided() {
        let only = snapshot(Some("f"), None);
        assert_eq!(pick_latest(Some(&only), None), Some(Winner::Local));
        assert_eq!(pick_latest(None, Some(&only)), Some(Winner::Remote));
        assert_eq!(only.instance_id, Some(ForceId::new("f")));
    }
}
