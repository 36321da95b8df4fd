//! Argument coercion tests across every argument kind.

use api_schema::Argument;
use serde_json::{json, Value};

fn valid(arg: &Argument, raw: Value, expected: Value) {
    let raw = (!raw.is_null()).then_some(raw);
    let got = arg
        .validate_at(raw.as_ref(), "test item")
        .unwrap_or_else(|e| panic!("expected {:?} to validate: {}", raw, e));
    assert_eq!(got.unwrap_or(Value::Null), expected, "input {:?}", raw);
}

fn invalid(arg: &Argument, raw: Value) {
    let raw = (!raw.is_null()).then_some(raw);
    let result = arg.validate_at(raw.as_ref(), "test item");
    assert!(result.is_err(), "expected {:?} to be rejected, got {:?}", raw, result);
}

mod boolean {
    use super::*;

    #[test]
    fn any_case_spelling() {
        let arg = Argument::boolean("test bool arg").required();
        for raw in ["true", "TRUE", "True", "TrUe"] {
            valid(&arg, json!(raw), json!(true));
        }
        for raw in ["false", "FALSE", "False", "FaLSe"] {
            valid(&arg, json!(raw), json!(false));
        }
        invalid(&arg, Value::Null);
        invalid(&arg, json!("hello"));
    }

    #[test]
    fn only_zero_and_one_integers() {
        let arg = Argument::boolean("test bool arg").required();
        valid(&arg, json!("0"), json!(false));
        valid(&arg, json!("1"), json!(true));
        for raw in ["-241", "241", "0.0", "1.0", "1.234", "2"] {
            invalid(&arg, json!(raw));
        }
    }

    #[test]
    fn optional_and_default() {
        let optional = Argument::boolean("test arg");
        valid(&optional, json!("True"), json!(true));
        valid(&optional, Value::Null, Value::Null);

        let defaulted = Argument::boolean("test arg").default(false);
        valid(&defaulted, Value::Null, json!(false));
        valid(&defaulted, json!("true"), json!(true));

        let required_default = Argument::boolean("test arg").required().default(false);
        valid(&required_default, Value::Null, json!(false));
        valid(&required_default, json!("true"), json!(true));
    }
}

mod string {
    use super::*;

    #[test]
    fn required_rejects_empty() {
        let arg = Argument::string("test string arg").required();
        valid(&arg, json!("hello, world"), json!("hello, world"));
        valid(&arg, json!("12345"), json!("12345"));
        invalid(&arg, Value::Null);

        let err = arg.validate_at(Some(&json!("")), "test item").unwrap_err();
        assert_eq!(
            err.message,
            "This argument is required, and cannot be an empty string."
        );
    }

    #[test]
    fn optional_and_default() {
        let optional = Argument::string("test string arg");
        valid(&optional, json!("hello, world"), json!("hello, world"));
        valid(&optional, Value::Null, Value::Null);

        let defaulted = Argument::string("test string arg").default("hello tests");
        valid(&defaulted, json!("hello, world"), json!("hello, world"));
        valid(&defaulted, Value::Null, json!("hello tests"));

        let required_default = Argument::string("test string arg")
            .required()
            .default("hello tests");
        valid(&required_default, Value::Null, json!("hello tests"));
    }

    #[test]
    fn length_bounds() {
        let arg = Argument::string("name").min_length(3).max_length(5);
        invalid(&arg, json!("ab"));
        valid(&arg, json!("abc"), json!("abc"));
        valid(&arg, json!("abcde"), json!("abcde"));
        invalid(&arg, json!("abcdef"));
    }
}

mod url {
    use super::*;

    #[test]
    fn absolute_urls() {
        let arg = Argument::url("test url arg").required();
        invalid(&arg, Value::Null);
        invalid(&arg, json!(""));
        invalid(&arg, json!("ftp://www.google.com/"));
        invalid(&arg, json!("i am not a url"));
        invalid(&arg, json!("/foo/bar/baz"));
        valid(
            &arg,
            json!("https://www.google.com/"),
            json!("https://www.google.com/"),
        );

        let optional = Argument::url("test url arg");
        valid(&optional, Value::Null, Value::Null);
    }

    #[test]
    fn path_only() {
        let arg = Argument::url("test url arg").path_only();
        invalid(&arg, json!("https://www.google.com/"));
        for path in [
            "/foo/bar/baz",
            "/foo/bar/baz?query=hi",
            "/foo/bar/baz#hello",
            "/foo/bar/baz?query=hi#hello",
        ] {
            valid(&arg, json!(path), json!(path));
        }
    }
}

mod integer {
    use super::*;

    #[test]
    fn parses_whole_numbers_only() {
        let arg = Argument::integer("test integer arg").required();
        invalid(&arg, json!("i am not an int"));
        invalid(&arg, json!("Q"));
        invalid(&arg, Value::Null);
        invalid(&arg, json!("123.45"));
        valid(&arg, json!("123"), json!(123));
        valid(&arg, json!("-159"), json!(-159));
    }

    #[test]
    fn defaults() {
        let defaulted = Argument::integer("test integer arg").default(42);
        invalid(&defaulted, json!("i am not an int"));
        valid(&defaulted, Value::Null, json!(42));
        valid(&defaulted, json!("33"), json!(33));

        let required_default = Argument::integer("test integer arg").required().default(42);
        valid(&required_default, Value::Null, json!(42));
        valid(&required_default, json!("0"), json!(0));
    }

    #[test]
    fn bounds() {
        let minimum = Argument::integer("test integer arg").min_value(9.0);
        invalid(&minimum, json!(8));
        invalid(&minimum, json!(-873));
        valid(&minimum, json!(9), json!(9));
        valid(&minimum, json!(31423), json!(31423));

        let maximum = Argument::integer("test integer arg").max_value(9.0);
        invalid(&maximum, json!(10));
        valid(&maximum, json!(9), json!(9));
        valid(&maximum, json!(-31423), json!(-31423));

        let both = Argument::integer("test integer arg").range(0.0, 9.0);
        for raw in [10, 873, -1, -972151] {
            invalid(&both, json!(raw));
        }
        for raw in [9, 0, 5] {
            valid(&both, json!(raw), json!(raw));
        }

        let err = both.validate_at(Some(&json!(10)), "n").unwrap_err();
        assert_eq!(err.message, "You must provide a value between 0 and 9");
    }
}

mod float {
    use super::*;

    #[test]
    fn parses_numbers() {
        let arg = Argument::float("test float arg").required();
        invalid(&arg, json!("i am not a float"));
        invalid(&arg, json!("Q"));
        invalid(&arg, Value::Null);
        valid(&arg, json!("123"), json!(123.0));
        valid(&arg, json!("123.45"), json!(123.45));
        valid(&arg, json!("-159"), json!(-159.0));
    }

    #[test]
    fn defaults() {
        let arg = Argument::float("test float arg").default(1.5);
        valid(&arg, Value::Null, json!(1.5));
        valid(&arg, json!(42.245), json!(42.245));
    }

    #[test]
    fn bounds() {
        let minimum = Argument::float("test float arg").min_value(0.2);
        invalid(&minimum, json!("-1.589"));
        invalid(&minimum, json!("0.1"));
        valid(&minimum, json!("0.2"), json!(0.2));
        valid(&minimum, json!("12.245"), json!(12.245));

        let maximum = Argument::float("test float arg").max_value(100.0);
        invalid(&maximum, json!("158.9"));
        invalid(&maximum, json!("100.1"));
        valid(&maximum, json!("99.9"), json!(99.9));
        valid(&maximum, json!("-102.245"), json!(-102.245));

        let unit = Argument::float("test float arg").range(0.0, 1.0);
        invalid(&unit, json!("1.1"));
        invalid(&unit, json!("-102.245"));
        valid(&unit, json!("0.567235"), json!(0.567235));
        valid(&unit, json!("0"), json!(0.0));
        valid(&unit, json!("1"), json!(1.0));
    }
}

mod lists {
    use super::*;

    #[test]
    fn scope_splits_on_spaces() {
        let arg = Argument::scope("test scope arg").required();
        invalid(&arg, Value::Null);
        valid(&arg, json!("hello world"), json!(["hello", "world"]));
        valid(
            &arg,
            json!("hello.world and.goodbye.mars"),
            json!(["hello.world", "and.goodbye.mars"]),
        );
    }

    #[test]
    fn string_list_separated_values() {
        let arg = Argument::string_list("test string list arg")
            .separator(",")
            .required();
        invalid(&arg, Value::Null);
        valid(&arg, json!("hello world"), json!(["hello world"]));
        valid(&arg, json!("hello,world"), json!(["hello", "world"]));
        valid(&arg, json!("hello, world"), json!(["hello", " world"]));
    }

    #[test]
    fn string_list_query_lists() {
        let arg = Argument::string_list("test string list arg")
            .separator(",")
            .required();
        valid(&arg, json!(["hello", "world"]), json!(["hello", "world"]));
        valid(&arg, json!(["hello", " world"]), json!(["hello", " world"]));
        valid(&arg, json!(["hello,world"]), json!(["hello", "world"]));
    }

    #[test]
    fn string_list_trims() {
        let arg = Argument::string_list("test string list arg")
            .separator(",")
            .trim_whitespace()
            .required();
        valid(&arg, json!("hello, world"), json!(["hello", "world"]));
        valid(&arg, json!(["hello", "world"]), json!(["hello", "world"]));
        valid(&arg, json!(["hello", " world"]), json!(["hello", "world"]));
    }

    #[test]
    fn typed_items() {
        let arg = Argument::list("test list arg")
            .item(Argument::boolean("Boolean items"))
            .required();
        invalid(&arg, json!("true"));
        valid(
            &arg,
            json!(["true", "True", "1", "false"]),
            json!([true, true, true, false]),
        );
        invalid(&arg, json!(["true", "True", "1", "false", "hello, world"]));

        let optional = Argument::list("test list arg").item(Argument::string("a string"));
        valid(&optional, Value::Null, Value::Null);
    }
}

mod json_dict {
    use super::*;

    fn dict() -> Argument {
        Argument::json_dict("test dict arg")
            .required()
            .field("foo", Argument::string("the thing's foo").required())
            .field("count", Argument::integer("why not have a count?").required())
            .field("optionals", Argument::string_list("more optional things"))
    }

    #[test]
    fn fills_absent_keys_with_null() {
        valid(
            &dict(),
            json!(r#"{"foo": "hello", "count": 5}"#),
            json!({"foo": "hello", "count": 5, "optionals": null}),
        );
    }

    #[test]
    fn rejects_bad_documents() {
        let arg = dict();
        invalid(&arg, json!(r#"{"foo": "bar"}"#));
        invalid(&arg, json!("this is not a json."));
        invalid(
            &arg,
            json!(r#"{"foo": "hi", "count": 10, "extra": "something else"}"#),
        );
    }

    #[test]
    fn extra_keys_pass_through_when_allowed() {
        let arg = dict().allow_extra_fields();
        valid(
            &arg,
            json!(
                r#"{"foo": "hi", "count": 10, "extra": "something else",
                    "optionals": ["hello", "how are you"]}"#
            ),
            json!({
                "foo": "hi",
                "count": 10,
                "extra": "something else",
                "optionals": ["hello", "how are you"]
            }),
        );
    }

    #[test]
    fn nested_failures_name_the_key() {
        let err = dict()
            .validate_at(Some(&json!({"foo": "hi", "count": "many"})), "filter")
            .unwrap_err();
        assert_eq!(err.path, "filter.count");
    }
}
