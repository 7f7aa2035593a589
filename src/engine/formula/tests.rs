use super::{FormulaEngine, FormulaScope};
use crate::domain::{FieldValue, SourceRecord};
use crate::engine::error::ProcessingError;
use std::collections::BTreeMap;

fn engine() -> FormulaEngine {
    FormulaEngine::new(4096)
}

fn eval(formula: &str, value: FieldValue) -> Result<FieldValue, ProcessingError> {
    let fields = BTreeMap::new();
    engine().evaluate(formula, &FormulaScope::new(value, &fields))
}

fn text(s: &str) -> FieldValue {
    FieldValue::Text(s.to_string())
}

#[test]
fn test_expression_returns_last_value() {
    assert_eq!(eval("value * 2 + 1", text("10")), Ok(FieldValue::Number(21.0)));
    assert_eq!(eval("$value & ' EUR'", text("10")), Ok(text("10 EUR")));
    assert_eq!(eval("", text("keep")), Ok(text("keep")));
}

#[test]
fn test_statements_let_if_return() {
    let formula = r#"
        let base = num(value);
        if (base > 100) {
            return round(base * 0.9, 2);
        } else if (base > 50) {
            return base - 5;
        }
        base
    "#;
    assert_eq!(eval(formula, text("200")), Ok(FieldValue::Number(180.0)));
    assert_eq!(eval(formula, text("60")), Ok(FieldValue::Number(55.0)));
    assert_eq!(eval(formula, text("10")), Ok(FieldValue::Number(10.0)));
}

#[test]
fn test_ternary_and_boolean_ops() {
    assert_eq!(
        eval("value == 'yes' and len(value) == 3 ? 'Y' : 'N'", text("yes")),
        Ok(text("Y"))
    );
    assert_eq!(eval("!value || false", text("")), Ok(FieldValue::Bool(true)));
}

#[test]
fn test_allow_listed_functions() {
    assert_eq!(eval("upper(trim(value))", text("  shirt ")), Ok(text("SHIRT")));
    assert_eq!(
        eval("join(unique(split(value, '|')), ', ')", text("a|b|a")),
        Ok(text("a, b"))
    );
    assert_eq!(
        eval("regex_replace(value, '[0-9]+', '#')", text("a1b22")),
        Ok(text("a#b#"))
    );
    assert_eq!(
        eval("number_format(value, 2, ',', '.')", text("1234.5")),
        Ok(text("1.234,50"))
    );
    assert_eq!(eval("str_replace('a', 'o', value)", text("banana")), Ok(text("bonono")));
    assert_eq!(eval("substr(value, 0, 3)", text("abcdef")), Ok(text("abc")));
}

#[test]
fn test_sandbox_violation_for_unknown_function() {
    let result = eval("system('rm -rf /')", text("x"));
    assert_eq!(
        result,
        Err(ProcessingError::FormulaSandboxViolation {
            function: "system".to_string()
        })
    );
}

#[test]
fn test_syntax_and_runtime_errors() {
    assert!(matches!(
        eval("value +", text("1")),
        Err(ProcessingError::FormulaSyntaxError { .. })
    ));
    assert!(matches!(
        eval("'unterminated", text("1")),
        Err(ProcessingError::FormulaSyntaxError { .. })
    ));
    assert!(matches!(
        eval("value / 0", text("1")),
        Err(ProcessingError::FormulaRuntimeError(_))
    ));
}

#[test]
fn test_sibling_fields_and_source_paths() {
    let mut fields = BTreeMap::new();
    fields.insert("brand".to_string(), text("Acme"));
    let record = SourceRecord::from_pairs(0, [("images/image", "1.jpg"), ("images/image", "2.jpg")]);
    let scope = FormulaScope::new(text("Shirt"), &fields).with_record(&record);

    let result = engine()
        .evaluate("brand & ' ' & value & ' (' & count(field('images/image')) & ')'", &scope)
        .unwrap();
    assert_eq!(result, text("Acme Shirt (2)"));
}

#[test]
fn test_validate_rejects_long_and_empty_formulas() {
    let engine = FormulaEngine::new(10);
    assert!(matches!(
        engine.validate("value & 'this is too long'"),
        Err(ProcessingError::ConfigurationError(_))
    ));
    assert!(matches!(
        engine.validate("   "),
        Err(ProcessingError::ConfigurationError(_))
    ));
    assert!(engine.validate("value").is_ok());
}

#[test]
fn test_deep_nesting_is_rejected() {
    let formula = format!("{}1{}", "(".repeat(200), ")".repeat(200));
    assert!(matches!(
        eval(&formula, text("")),
        Err(ProcessingError::FormulaSyntaxError { .. })
    ));
}

#[test]
fn test_substr_with_extreme_bounds() {
    assert_eq!(
        eval("substr(value, 1, 99999999999999999999)", text("abcdef")),
        Ok(text("bcdef"))
    );
    assert_eq!(
        eval("substr(value, 99999999999999999999, 3)", text("abc")),
        Ok(text(""))
    );
    assert_eq!(
        eval("substr(value, -99999999999999999999, 2)", text("abc")),
        Ok(text("ab"))
    );
    assert_eq!(eval("substr(value, 4, -99999999999999999999)", text("abcdef")), Ok(text("")));
    assert_eq!(eval("substr(value, -2)", text("abcdef")), Ok(text("ef")));
    assert_eq!(eval("substr(value, 1, -1)", text("abcdef")), Ok(text("bcde")));
}

#[test]
fn test_padding_and_decimals_are_bounded() {
    let fields = BTreeMap::new();
    let scope = FormulaScope::new(text("7"), &fields);
    let padded = FormulaEngine::new(64)
        .evaluate("pad_left(value, 999999999999999, '0')", &scope)
        .unwrap();
    assert_eq!(padded.as_text().chars().count(), 64);

    let padded = FormulaEngine::new(64)
        .evaluate("pad_right(value, 3, '-')", &scope)
        .unwrap();
    assert_eq!(padded, text("7--"));

    let formatted = eval("number_format(value, 999999999)", text("1.5")).unwrap();
    let fraction = formatted.as_text().split_once('.').map(|(_, f)| f.len());
    assert_eq!(fraction, Some(20));

    assert_eq!(eval("round(value, 999999)", text("2.5")), Ok(FieldValue::Number(2.5)));
}
