//! Tag selection rules for the pulling strategies.

use chrono::{DateTime, Utc};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks the lexicographically greatest tag.
///
/// This is plain string ordering, so `v2` beats `v10`.
pub fn select_lexicographic<S: AsRef<str>>(tags: &[S]) -> Option<&str> {
    tags.iter().map(|tag| tag.as_ref()).max()
}

/// Picks the tag with the most recent creation time.
///
/// Ties are broken in favour of the lexicographically greater tag so the result does not depend
/// on the order in which the dates arrived.
pub fn select_latest_by_date<I>(dated: I) -> Option<(String, DateTime<Utc>)>
where
    I: IntoIterator<Item = (String, DateTime<Utc>)>,
{
    dated
        .into_iter()
        .max_by(|(tag_a, date_a), (tag_b, date_b)| date_a.cmp(date_b).then(tag_a.cmp(tag_b)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_lexicographic_uses_string_order() {
        assert_eq!(select_lexicographic(&["v1", "v10", "v2"]), Some("v2"));
        assert_eq!(select_lexicographic::<&str>(&[]), None);
    }

    #[test]
    fn test_latest_by_date_picks_newest() {
        let dated = vec![
            ("a".to_string(), at(1)),
            ("b".to_string(), at(3)),
            ("c".to_string(), at(2)),
        ];

        assert_eq!(select_latest_by_date(dated), Some(("b".to_string(), at(3))));
    }

    #[test]
    fn test_latest_by_date_tie_goes_to_greater_tag() {
        let forward = vec![("1.0".to_string(), at(5)), ("1.1".to_string(), at(5))];
        let backward = vec![("1.1".to_string(), at(5)), ("1.0".to_string(), at(5))];

        assert_eq!(select_latest_by_date(forward).unwrap().0, "1.1");
        assert_eq!(select_latest_by_date(backward).unwrap().0, "1.1");
    }

    proptest! {
        #[test]
        fn test_lexicographic_never_loses_to_another_tag(tags in prop::collection::vec("[a-z0-9.]{1,8}", 1..20)) {
            let selected = select_lexicographic(&tags[..]).unwrap();
            prop_assert!(tags.iter().any(|t| t == selected));
            prop_assert!(tags.iter().all(|t| t.as_str() <= selected));
        }

        #[test]
        fn test_latest_by_date_is_order_independent(
            entries in prop::collection::vec(("[a-z]{1,4}", 0i64..50), 1..20)
        ) {
            let dated: Vec<_> = entries.iter().map(|(t, s)| (t.clone(), at(*s))).collect();
            let mut reversed = dated.clone();
            reversed.reverse();

            let selected = select_latest_by_date(dated.clone()).unwrap();
            prop_assert_eq!(&selected, &select_latest_by_date(reversed).unwrap());
            prop_assert!(dated.iter().all(|(_, date)| *date <= selected.1));
        }
    }
}
