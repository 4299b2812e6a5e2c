//! Property tests for rendering invariants: trim behavior, range counts,
//! eq/ne duality, scope balance, and the dumper fixpoint.

use hob_interpreter::render;
use hob_value::Value;
use proptest::prelude::*;

/// Plain text with no delimiter or marker characters.
fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 \t]{0,12}"
}

/// Small template fragments that parse on their own.
fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{1,8}",
        (-999i64..999).prop_map(|n| format!("{{{{{}}}}}", n)),
        "[a-z]{1,6}".prop_map(|f| format!("{{{{.{}}}}}", f)),
        "[a-z]{1,6}".prop_map(|f| format!("{{{{\"{}\" | print}}}}", f)),
    ]
}

fn arb_template() -> impl Strategy<Value = String> {
    (
        proptest::collection::vec(arb_fragment(), 0..5),
        "[a-z]{1,4}",
        proptest::bool::ANY,
    )
        .prop_map(|(frags, cond, wrap)| {
            let inner = frags.concat();
            if wrap {
                format!("{{{{if .{}}}}}{}{{{{else}}}}none{{{{end}}}}", cond, inner)
            } else {
                inner
            }
        })
}

proptest! {
    #[test]
    fn trim_strips_exactly_the_adjacent_whitespace(x in arb_text(), y in arb_text()) {
        let src = format!("{}{} {}", x, "{{- \"E\" -}}", y);
        let out = render("t", &src, Value::Nil).unwrap();
        let expect = format!("{}E{}", x.trim_end(), format!(" {}", y).trim_start());
        prop_assert_eq!(out, expect);
    }

    #[test]
    fn range_body_count_matches_iteration_count(
        items in proptest::collection::vec(any::<i64>(), 0..20)
    ) {
        let data = Value::seq(items.iter().map(|&i| Value::from(i)).collect());
        let out = render("t", "{{range .}}x{{end}}", data).unwrap();
        prop_assert_eq!(out.len(), items.len());
    }

    #[test]
    fn eq_and_ne_are_duals(a in -5i64..5, bs in proptest::collection::vec(-5i64..5, 1..4)) {
        let args: String = bs.iter().map(|n| format!(" {}", n)).collect();
        let eq_src = format!("{}{}{}", "{{eq .", args, "}}");
        let ne_src = format!("{}{}{}", "{{ne .", args, "}}");
        let eq_out = render("t", &eq_src, Value::from(a)).unwrap();
        let ne_out = render("t", &ne_src, Value::from(a)).unwrap();
        prop_assert_eq!(&eq_out, if bs.contains(&a) { "true" } else { "false" });
        prop_assert_ne!(eq_out, ne_out);
    }

    #[test]
    fn scopes_unwind_to_the_outer_binding(items in proptest::collection::vec(any::<i64>(), 0..8)) {
        // Shadowing inside the loop body must never leak out.
        let data = Value::seq(items.iter().map(|&i| Value::from(i)).collect());
        let src = "{{$x := 9}}{{range .}}{{$x := .}}{{end}}{{$x}}";
        prop_assert_eq!(render("t", src, data).unwrap(), "9");
    }

    #[test]
    fn root_survives_with(v in -100i64..100) {
        let out = render("t", "{{with 1}}{{$}}{{end}}", Value::from(v)).unwrap();
        prop_assert_eq!(out, v.to_string());
    }

    #[test]
    fn dump_is_a_parse_fixpoint(src in arb_template()) {
        let first = hob_parser::parse_str("t", &src).unwrap();
        let dumped = first.dump();
        let second = hob_parser::parse_str("t", &dumped).unwrap();
        prop_assert_eq!(second.dump(), dumped);
    }
}
