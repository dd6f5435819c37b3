//! Test-data generation for parameters and attributes.

use chrono::{Duration, SubsecRound, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::types::{DataKind, DateValue, TypedValue};

const MAX_STRING_LEN: usize = 10;
const DATE_SPAN_DAYS: i64 = 30;
const MAX_INT: i32 = 100;
const MAX_FLOAT: f64 = 10_000.0;
const FLOAT_DECIMALS: i32 = 4;

/// A random value of `kind` using the thread-local generator.
///
/// Returns `None` for [`DataKind::Undetermined`].
pub fn random_value(kind: DataKind) -> Option<TypedValue> {
    random_value_with(&mut rand::thread_rng(), kind)
}

/// Like [`random_value`] with a caller-provided generator, so tests can seed it.
pub fn random_value_with<R: Rng + ?Sized>(rng: &mut R, kind: DataKind) -> Option<TypedValue> {
    let value = match kind {
        DataKind::String => {
            let len = rng.gen_range(1..=MAX_STRING_LEN);
            TypedValue::String((0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect())
        }
        DataKind::Uuid => TypedValue::Uuid(Uuid::new_v4()),
        DataKind::Date => {
            let days = rng.gen_range(0..=DATE_SPAN_DAYS);
            let when = (Utc::now() - Duration::days(days)).trunc_subsecs(0);
            TypedValue::Date(DateValue::Zoned(when.fixed_offset()))
        }
        DataKind::Bool => TypedValue::Bool(rng.gen_bool(0.5)),
        DataKind::Int => TypedValue::Int(rng.gen_range(0..=MAX_INT)),
        DataKind::Float => {
            let scale = 10f64.powi(FLOAT_DECIMALS);
            TypedValue::Float((rng.gen_range(0.0..MAX_FLOAT) * scale).round() / scale)
        }
        DataKind::Undetermined => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::is_value_convertible;
    use rand::{rngs::StdRng, SeedableRng};

    const KINDS: [DataKind; 6] = [
        DataKind::String,
        DataKind::Uuid,
        DataKind::Date,
        DataKind::Bool,
        DataKind::Int,
        DataKind::Float,
    ];

    #[test]
    fn generated_values_convert_back_to_their_kind() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            for kind in KINDS {
                let value = random_value_with(&mut rng, kind).unwrap();
                assert_eq!(value.kind(), kind);
                let mut text = value.canonical_text();
                assert!(is_value_convertible(kind, &mut text), "{kind}: {text}");
                assert_eq!(text, value.canonical_text());
            }
        }
    }

    #[test]
    fn undetermined_generates_nothing() {
        assert!(random_value(DataKind::Undetermined).is_none());
    }

    #[test]
    fn strings_are_short_lowercase() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let Some(TypedValue::String(s)) = random_value_with(&mut rng, DataKind::String) else {
                panic!("expected a string");
            };
            assert!((1..=MAX_STRING_LEN).contains(&s.len()));
            assert!(s.bytes().all(|b| b.is_ascii_lowercase()));
        }
    }
}
