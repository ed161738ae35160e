//! Right-hand sides of `set` operations

use super::variables::Variables;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Computed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueExpr {
    /// Uniform integer in `[min, max]`
    RandomInt { min: i64, max: i64 },
    /// Current value of the target variable plus `n` (missing counts as 0)
    Increment(i64),
    /// Current value of another variable
    Copy(String),
}

/// Either a computed expression or a literal JSON value
///
/// In a description, `{ increment: 1 }` is an expression and anything that is
/// not one of the expression shapes is taken literally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSource {
    Expr(ValueExpr),
    Literal(Value),
}

impl ValueSource {
    /// Validate parameters at build time
    pub fn check(&self) -> Result<(), String> {
        match self {
            ValueSource::Expr(ValueExpr::RandomInt { min, max }) if min > max => {
                Err(format!("random_int min {} is greater than max {}", min, max))
            }
            ValueSource::Expr(ValueExpr::Copy(name)) if name.is_empty() => {
                Err("copy needs a variable name".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Compute the value to assign to `target`
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        target: &str,
        variables: &Variables,
        rng: &mut R,
    ) -> Result<Value, String> {
        match self {
            ValueSource::Literal(value) => Ok(value.clone()),
            ValueSource::Expr(ValueExpr::RandomInt { min, max }) => {
                Ok(Value::from(rng.gen_range(*min..=*max)))
            }
            ValueSource::Expr(ValueExpr::Increment(by)) => {
                let current = match variables.get(target) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| {
                        format!("cannot increment non-integer `{}` = {}", target, value)
                    })?,
                };
                current
                    .checked_add(*by)
                    .map(Value::from)
                    .ok_or_else(|| format!("increment of `{}` overflows", target))
            }
            ValueSource::Expr(ValueExpr::Copy(source)) => variables
                .get(source)
                .cloned()
                .ok_or_else(|| format!("unknown variable `{}`", source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use serde_json::json;

    fn parse(yaml: &str) -> ValueSource {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(parse("5"), ValueSource::Literal(json!(5)));
        assert_eq!(parse("{ increment: 2 }"), ValueSource::Expr(ValueExpr::Increment(2)));
        assert_eq!(parse("{ copy: other }"), ValueSource::Expr(ValueExpr::Copy("other".into())));
        assert_eq!(
            parse("{ random_int: { min: 1, max: 3 } }"),
            ValueSource::Expr(ValueExpr::RandomInt { min: 1, max: 3 })
        );
        assert_eq!(parse("{ name: x }"), ValueSource::Literal(json!({ "name": "x" })));
    }

    #[test]
    fn test_increment() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut vars = Variables::new();
        let inc = ValueSource::Expr(ValueExpr::Increment(3));

        assert_eq!(inc.evaluate("n", &vars, &mut rng).unwrap(), json!(3));
        vars.set("n", json!(10));
        assert_eq!(inc.evaluate("n", &vars, &mut rng).unwrap(), json!(13));
        vars.set("n", json!("text"));
        assert!(inc.evaluate("n", &vars, &mut rng).is_err());
    }

    #[test]
    fn test_random_int_in_range() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let vars = Variables::new();
        let expr = ValueSource::Expr(ValueExpr::RandomInt { min: -2, max: 2 });
        for _ in 0..200 {
            let v = expr.evaluate("x", &vars, &mut rng).unwrap().as_i64().unwrap();
            assert!((-2..=2).contains(&v));
        }
    }

    #[test]
    fn test_copy_and_check() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut vars = Variables::new();
        vars.set("a", json!([1, 2]));
        let copy = ValueSource::Expr(ValueExpr::Copy("a".into()));
        assert_eq!(copy.evaluate("b", &vars, &mut rng).unwrap(), json!([1, 2]));
        assert!(ValueSource::Expr(ValueExpr::Copy("zz".into()))
            .evaluate("b", &vars, &mut rng)
            .is_err());

        assert!(ValueSource::Expr(ValueExpr::RandomInt { min: 5, max: 1 }).check().is_err());
        assert!(ValueSource::Literal(json!(null)).check().is_ok());
    }
}
