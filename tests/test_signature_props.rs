use binutils::{Kind, Signature, Value};
use proptest::prelude::*;

fn any_kind() -> impl Strategy<Value = Kind> {
    prop::sample::select(Kind::ALL.to_vec())
}

fn param_kind() -> impl Strategy<Value = Kind> {
    any_kind().prop_filter("void is not a parameter", |k| *k != Kind::Void)
}

proptest! {
    #[test]
    fn display_parses_back(params in prop::collection::vec(param_kind(), 0..12), ret in any_kind()) {
        let sig = Signature::new(params.clone(), ret).unwrap();
        let reparsed = Signature::parse(&sig.to_string()).unwrap();
        prop_assert_eq!(reparsed.params(), &params[..]);
        prop_assert_eq!(reparsed.return_kind(), ret);
    }

    #[test]
    fn parse_never_panics(text in "[vBcCsSiIjJlLfdpZ)x]{0,10}") {
        if let Ok(sig) = Signature::parse(&text) {
            // Accepted strings normalise to the canonical form
            prop_assert_eq!(Signature::parse(&sig.to_string()).unwrap(), sig.clone());
            prop_assert!(!sig.params().contains(&Kind::Void));
            prop_assert_eq!(text.matches(')').count(), 1);
        }
    }

    #[test]
    fn leading_void_means_no_parameters(ret in any_kind()) {
        let text = format!("v){}", ret.as_char());
        let sig = Signature::parse(&text).unwrap();
        prop_assert_eq!(sig.arity(), 0);
        prop_assert_eq!(sig.to_string(), format!("){}", ret.as_char()));
    }

    #[test]
    fn in_range_integers_coerce_exactly(v in any::<i16>()) {
        let coerced = Value::LongLong(v as i64).coerce(Kind::Short, 0).unwrap();
        prop_assert_eq!(coerced, Value::Short(v));

        let as_char = Value::Int(v as i32).coerce(Kind::Char, 0);
        prop_assert_eq!(as_char.is_ok(), i8::try_from(v).is_ok());
    }

    #[test]
    fn negative_integers_are_not_addresses(v in i64::MIN..0) {
        prop_assert!(Value::LongLong(v).coerce(Kind::Pointer, 3).is_err());
    }
}
