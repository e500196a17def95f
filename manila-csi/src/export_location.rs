//! Export location selection.

use libcsi::CsiError;

use crate::manila::ExportLocation;

/// Accepts every location.
pub fn any_location(_: &ExportLocation) -> bool {
    true
}

/// Pick one usable export location and return its index.
///
/// Admin-only locations, empty paths and locations rejected by `eligible`
/// are skipped.  The first preferred location wins; without one, the first
/// remaining location is used.
pub fn choose<F>(locations: &[ExportLocation], mut eligible: F) -> Result<usize, CsiError>
where
    F: FnMut(&ExportLocation) -> bool,
{
    let mut first = None;
    for (idx, location) in locations.iter().enumerate() {
        if location.is_admin_only || location.path.is_empty() || !eligible(location) {
            continue;
        }
        if location.preferred {
            return Ok(idx);
        }
        first.get_or_insert(idx);
    }
    first.ok_or_else(|| {
        CsiError::Internal(format!(
            "no usable export location among {} candidates",
            locations.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(path: &str, is_admin_only: bool, preferred: bool) -> ExportLocation {
        ExportLocation {
            path: path.to_owned(),
            is_admin_only,
            preferred,
            ..Default::default()
        }
    }

    #[test]
    fn first_non_admin_preferred_wins() {
        let locations = [
            loc("10.0.0.1:/a", true, false),
            loc("10.0.0.2:/a", false, false),
            loc("10.0.0.3:/a", true, true),
            loc("10.0.0.4:/a", false, true),
        ];
        assert_eq!(choose(&locations, any_location).unwrap(), 3);
    }

    #[test]
    fn without_preferred_lowest_index_wins() {
        let locations = [
            loc("10.0.0.1:/a", true, false),
            loc("", false, false),
            loc("10.0.0.2:/a", false, false),
            loc("10.0.0.3:/a", false, false),
        ];
        assert_eq!(choose(&locations, any_location).unwrap(), 2);
    }

    #[test]
    fn predicate_restricts_before_preference() {
        let locations = [
            loc("10.0.0.1:/a", false, true),
            loc("192.168.0.1:/a", false, false),
        ];
        let idx = choose(&locations, |l| l.path.starts_with("192.168.")).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn nothing_eligible_fails() {
        let locations = [loc("10.0.0.1:/a", true, true), loc("", false, true)];
        let err = choose(&locations, any_location).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
        assert!(choose(&[], any_location).is_err());
    }
}
