//! Property-based tests for model types.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::model::{ObjectRef, UserRef};

    /// Strategy to generate valid user identifiers in type:id format
    fn valid_user_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z0-9_-]{1,20}").prop_map(|(t, id)| format!("{t}:{id}"))
    }

    /// Strategy to generate valid userset references in type:id#relation format
    fn userset_reference_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z0-9]{1,10}", "[a-z]{1,10}")
            .prop_map(|(t, id, rel)| format!("{t}:{id}#{rel}"))
    }

    proptest! {
        #[test]
        fn test_user_type_id_format_is_valid(user_str in valid_user_strategy()) {
            let user = UserRef::parse(&user_str);
            prop_assert!(user.is_ok(), "Failed for user: {}", user_str);
            let user = user.unwrap();
            prop_assert!(matches!(user, UserRef::Object { .. }), "expected an object user for {}", user_str);
            prop_assert_eq!(user.to_string(), user_str);
        }

        #[test]
        fn test_user_userset_reference_is_valid(user_str in userset_reference_strategy()) {
            let user = UserRef::parse(&user_str);
            prop_assert!(user.is_ok(), "Failed for userset: {}", user_str);
            let user = user.unwrap();
            prop_assert!(user.relation().is_some());
            prop_assert_eq!(user.to_string(), user_str);
        }

        #[test]
        fn test_user_without_colon_is_invalid(s in "[a-z*#]{1,20}") {
            prop_assert!(UserRef::parse(&s).is_err(), "Should reject: {}", s);
        }

        #[test]
        fn test_wildcard_parses_for_any_type(t in "[a-z]{1,10}") {
            let user = UserRef::parse(&format!("{t}:*")).unwrap();
            prop_assert!(user.is_wildcard());
            prop_assert_eq!(user.user_type(), t.as_str());
        }

        #[test]
        fn test_object_parse_roundtrip(
            obj_type in "[a-z]{1,10}",
            obj_id in "[a-z0-9]{1,10}"
        ) {
            let input = format!("{obj_type}:{obj_id}");
            let parsed = ObjectRef::parse(&input);
            prop_assert!(parsed.is_ok());
            prop_assert_eq!(parsed.unwrap().to_string(), input);
        }

        #[test]
        fn test_object_with_whitespace_is_invalid(
            obj_type in "[a-z]{1,5}",
            left in "[a-z]{0,5}",
            right in "[a-z]{0,5}"
        ) {
            let input = format!("{obj_type}:{left} {right}");
            prop_assert!(ObjectRef::parse(&input).is_err());
        }
    }
}
