//! Built-in function library available to every expression.

use super::ExpressionError;
use super::value::Value;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Call a built-in by name
pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let value = match name {
        "abs" => unary(name, args, f64::abs)?,
        "sqrt" => unary(name, args, f64::sqrt)?,
        "cbrt" => unary(name, args, f64::cbrt)?,
        "exp" => unary(name, args, f64::exp)?,
        "log10" => unary(name, args, f64::log10)?,
        "log2" => unary(name, args, f64::log2)?,
        "log1p" => unary(name, args, f64::ln_1p)?,
        "sin" => unary(name, args, f64::sin)?,
        "cos" => unary(name, args, f64::cos)?,
        "tan" => unary(name, args, f64::tan)?,
        "asin" => unary(name, args, f64::asin)?,
        "acos" => unary(name, args, f64::acos)?,
        "atan" => unary(name, args, f64::atan)?,
        "sinh" => unary(name, args, f64::sinh)?,
        "cosh" => unary(name, args, f64::cosh)?,
        "tanh" => unary(name, args, f64::tanh)?,
        "floor" => unary(name, args, f64::floor)?,
        "ceil" => unary(name, args, f64::ceil)?,
        "trunc" => unary(name, args, f64::trunc)?,
        "sign" => unary(name, args, sign)?,
        "erf" => unary(name, args, erf)?,
        "zscoreToScore" => unary(name, args, |z| 100.0 * normal_cdf(z))?,

        "log" => {
            arity(name, args, 1)?;
            match (to_number(&args[0]), args.get(1)) {
                (None, _) => Value::Null,
                (Some(x), None) => Value::Number(x.ln()),
                (Some(x), Some(base)) => match to_number(base) {
                    Some(b) => Value::Number(x.ln() / b.ln()),
                    None => Value::Null,
                },
            }
        }
        "atan2" => binary(name, args, f64::atan2)?,
        "pow" => binary(name, args, f64::powf)?,
        "mod" => binary(name, args, |x, y| if y == 0.0 { x } else { x - y * (x / y).floor() })?,
        "round" => {
            arity(name, args, 1)?;
            let digits = optional_number(args, 1).unwrap_or(0.0);
            match to_number(&args[0]) {
                Some(x) => {
                    let factor = 10f64.powi(digits as i32);
                    Value::Number((x * factor).round() / factor)
                }
                None => Value::Null,
            }
        }
        "roundTo" => {
            arity(name, args, 1)?;
            let digits = optional_number(args, 1).unwrap_or(0.0);
            match to_number(&args[0]) {
                Some(x) => Value::Number(round_half_up(x, digits as i32)),
                None => Value::Null,
            }
        }
        "hypot" => {
            let values = collect_numbers(args);
            Value::Number(values.iter().map(|v| v * v).sum::<f64>().sqrt())
        }
        "min" => number_or_null(collect_numbers(args).into_iter().reduce(f64::min)),
        "max" => number_or_null(collect_numbers(args).into_iter().reduce(f64::max)),
        "number" => {
            arity(name, args, 1)?;
            number_or_null(to_number(&args[0]))
        }
        "string" => {
            arity(name, args, 1)?;
            Value::Str(args[0].to_string())
        }

        "clamp" => {
            arity(name, args, 3)?;
            match numbers3(args) {
                Some((x, lo, hi)) => Value::Number(x.max(lo).min(hi)),
                None => Value::Null,
            }
        }
        "normalize" => {
            arity(name, args, 3)?;
            match numbers3(args) {
                Some((_, lo, hi)) if hi == lo => Value::Number(0.0),
                Some((x, lo, hi)) => Value::Number((x - lo) / (hi - lo)),
                None => Value::Null,
            }
        }
        "lerp" => {
            arity(name, args, 3)?;
            match numbers3(args) {
                Some((a, b, t)) => Value::Number(a + (b - a) * t),
                None => Value::Null,
            }
        }
        "zscore" => {
            arity(name, args, 3)?;
            match numbers3(args) {
                Some((_, _, sd)) if sd == 0.0 => Value::Null,
                Some((x, mean, sd)) => Value::Number((x - mean) / sd),
                None => Value::Null,
            }
        }
        "percentile" => {
            arity(name, args, 2)?;
            let values = collect_numbers(&args[..1]);
            match to_number(&args[1]) {
                Some(p) => number_or_null(percentile(values, p)),
                None => Value::Null,
            }
        }
        "safeDivide" => {
            arity(name, args, 2)?;
            let fallback = args.get(2).cloned().unwrap_or(Value::Number(0.0));
            match (to_number(&args[0]), to_number(&args[1])) {
                (Some(a), Some(b)) if b != 0.0 && (a / b).is_finite() => Value::Number(a / b),
                _ => fallback,
            }
        }
        "isNull" => {
            arity(name, args, 1)?;
            Value::Bool(args[0].is_null())
        }
        "coalesce" => args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null),
        "splitNums" => {
            arity(name, args, 1)?;
            let separator = args.get(1).and_then(Value::as_str).unwrap_or(",");
            match &args[0] {
                Value::Str(text) => Value::Array(
                    text.split(separator)
                        .filter_map(|part| part.trim().parse::<f64>().ok())
                        .map(Value::Number)
                        .collect(),
                ),
                Value::Null => Value::Array(Vec::new()),
                other => Value::Array(collect_numbers(std::slice::from_ref(other)).into_iter().map(Value::Number).collect()),
            }
        }
        "sum" => Value::Number(collect_numbers(args).iter().sum()),
        "product" => Value::Number(collect_numbers(args).iter().product()),
        "mean" => {
            let values = collect_numbers(args);
            if values.is_empty() {
                Value::Null
            } else {
                Value::Number(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        "harmonicMean" => {
            let values = collect_numbers(args);
            if values.is_empty() || values.iter().any(|v| *v <= 0.0) {
                Value::Null
            } else {
                Value::Number(values.len() as f64 / values.iter().map(|v| 1.0 / v).sum::<f64>())
            }
        }
        "weightedMean" => {
            arity(name, args, 2)?;
            weighted_mean(&args[0], &args[1])
        }

        "random" => {
            return Err(ExpressionError::Evaluation(
                "random numbers are not available in widget expressions".to_string(),
            ));
        }
        other => {
            return Err(ExpressionError::Evaluation(format!("unknown function '{}'", other)));
        }
    };
    Ok(value)
}

/// Numeric constants exposed as `Math.<NAME>`
pub fn math_constants() -> Value {
    let entries = [
        ("PI", PI),
        ("E", std::f64::consts::E),
        ("LN2", std::f64::consts::LN_2),
        ("LN10", std::f64::consts::LN_10),
        ("LOG2E", std::f64::consts::LOG2_E),
        ("LOG10E", std::f64::consts::LOG10_E),
        ("SQRT2", std::f64::consts::SQRT_2),
        ("SQRT1_2", FRAC_1_SQRT_2),
    ];
    Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::Number(v)))
            .collect(),
    )
}

/// Loose numeric coercion: numbers, booleans and numeric strings
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Flatten arguments (or a single array argument) into their numeric members
pub fn collect_numbers(args: &[Value]) -> Vec<f64> {
    fn walk(value: &Value, out: &mut Vec<f64>) {
        match value {
            Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            Value::Number(n) if !n.is_nan() => out.push(*n),
            _ => {}
        }
    }
    let mut out = Vec::new();
    for arg in args {
        walk(arg, &mut out);
    }
    out
}

fn arity(name: &str, args: &[Value], min: usize) -> Result<(), ExpressionError> {
    if args.len() < min {
        Err(ExpressionError::Evaluation(format!(
            "{}() expects at least {} argument{}",
            name,
            min,
            if min == 1 { "" } else { "s" }
        )))
    } else {
        Ok(())
    }
}

fn unary(name: &str, args: &[Value], f: impl Fn(f64) -> f64) -> Result<Value, ExpressionError> {
    arity(name, args, 1)?;
    Ok(number_or_null(to_number(&args[0]).map(f)))
}

fn binary(name: &str, args: &[Value], f: impl Fn(f64, f64) -> f64) -> Result<Value, ExpressionError> {
    arity(name, args, 2)?;
    Ok(match (to_number(&args[0]), to_number(&args[1])) {
        (Some(a), Some(b)) => Value::Number(f(a, b)),
        _ => Value::Null,
    })
}

fn numbers3(args: &[Value]) -> Option<(f64, f64, f64)> {
    Some((to_number(&args[0])?, to_number(&args[1])?, to_number(&args[2])?))
}

fn optional_number(args: &[Value], index: usize) -> Option<f64> {
    args.get(index).and_then(to_number)
}

fn number_or_null(value: Option<f64>) -> Value {
    value.map(Value::Number).unwrap_or(Value::Null)
}

fn sign(x: f64) -> f64 {
    if x.is_nan() {
        f64::NAN
    } else if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn round_half_up(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (x * factor + 0.5).floor() / factor
}

/// Abramowitz and Stegun formula 7.1.26 (max error 1.5e-7)
pub fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z * FRAC_1_SQRT_2))
}

/// Linear-interpolated percentile, `p` in 0..=100
fn percentile(mut values: Vec<f64>, p: f64) -> Option<f64> {
    if values.is_empty() || p.is_nan() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * fraction)
}

fn weighted_mean(values: &Value, weights: &Value) -> Value {
    let (Value::Array(values), Value::Array(weights)) = (values, weights) else {
        return Value::Null;
    };
    let mut total = 0.0;
    let mut weight_sum = 0.0;
    for (value, weight) in values.iter().zip(weights.iter()) {
        if let (Some(v), Some(w)) = (value.as_number(), weight.as_number()) {
            total += v * w;
            weight_sum += w;
        }
    }
    if weight_sum == 0.0 {
        Value::Null
    } else {
        Value::Number(total / weight_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    fn nums(xs: &[f64]) -> Value {
        Value::Array(xs.iter().copied().map(Value::Number).collect())
    }

    fn call(name: &str, args: &[Value]) -> Value {
        call_builtin(name, args).unwrap()
    }

    fn approx(value: Value, expected: f64) {
        match value {
            Value::Number(x) => assert!((x - expected).abs() < 1e-4, "{} != {}", x, expected),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_rounding() {
        assert_eq!(call("roundTo", &[n(2.5)]), n(3.0));
        assert_eq!(call("roundTo", &[n(-2.5)]), n(-2.0));
        assert_eq!(call("roundTo", &[n(1.25), n(1.0)]), n(1.3));
        assert_eq!(call("round", &[n(1.234), n(2.0)]), n(1.23));
    }

    #[test]
    fn test_normalize_clamp_lerp_zscore() {
        assert_eq!(call("normalize", &[n(5.0), n(0.0), n(10.0)]), n(0.5));
        assert_eq!(call("normalize", &[n(5.0), n(3.0), n(3.0)]), n(0.0));
        assert_eq!(call("clamp", &[n(12.0), n(0.0), n(10.0)]), n(10.0));
        assert_eq!(call("lerp", &[n(0.0), n(10.0), n(0.25)]), n(2.5));
        assert_eq!(call("zscore", &[n(12.0), n(10.0), n(2.0)]), n(1.0));
        assert_eq!(call("zscore", &[n(12.0), n(10.0), n(0.0)]), Value::Null);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = nums(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(call("percentile", &[values.clone(), n(0.0)]), n(1.0));
        assert_eq!(call("percentile", &[values.clone(), n(100.0)]), n(4.0));
        assert_eq!(call("percentile", &[values, n(50.0)]), n(2.5));
        assert_eq!(call("percentile", &[nums(&[]), n(50.0)]), Value::Null);
    }

    #[test]
    fn test_erf_and_score() {
        approx(call("erf", &[n(0.0)]), 0.0);
        approx(call("erf", &[n(1.0)]), 0.842_700_8);
        approx(call("erf", &[n(-1.0)]), -0.842_700_8);
        approx(call("zscoreToScore", &[n(0.0)]), 50.0);
        approx(call("zscoreToScore", &[n(1.0)]), 84.134_47);
    }

    #[test]
    fn test_safe_divide_and_null_helpers() {
        assert_eq!(call("safeDivide", &[n(6.0), n(3.0)]), n(2.0));
        assert_eq!(call("safeDivide", &[n(6.0), n(0.0)]), n(0.0));
        assert_eq!(call("safeDivide", &[n(6.0), n(0.0), n(-1.0)]), n(-1.0));
        assert_eq!(call("isNull", &[Value::Null]), Value::Bool(true));
        assert_eq!(call("coalesce", &[Value::Null, n(3.0), n(4.0)]), n(3.0));
    }

    #[test]
    fn test_collection_helpers() {
        assert_eq!(call("sum", &[nums(&[1.0, 2.0, 3.0])]), n(6.0));
        assert_eq!(call("sum", &[n(1.0), n(2.0), Value::Null]), n(3.0));
        assert_eq!(call("product", &[nums(&[2.0, 3.0])]), n(6.0));
        assert_eq!(call("mean", &[nums(&[2.0, 4.0])]), n(3.0));
        assert_eq!(call("mean", &[nums(&[])]), Value::Null);
        assert_eq!(call("harmonicMean", &[nums(&[1.0, 4.0, 4.0])]), n(2.0));
        assert_eq!(call("harmonicMean", &[nums(&[1.0, 0.0])]), Value::Null);
        assert_eq!(call("weightedMean", &[nums(&[8.0, 10.0, 6.0]), nums(&[1.0, 0.5, 0.5])]), n(8.0));
        assert_eq!(call("weightedMean", &[nums(&[8.0]), nums(&[0.0])]), Value::Null);
        assert_eq!(
            call("splitNums", &[Value::Str("1, 2,x,3.5".into())]),
            nums(&[1.0, 2.0, 3.5])
        );
        assert_eq!(call("splitNums", &[Value::Str("1|2".into()), Value::Str("|".into())]), nums(&[1.0, 2.0]));
    }

    #[test]
    fn test_null_propagation_and_errors() {
        assert_eq!(call("sqrt", &[Value::Null]), Value::Null);
        assert_eq!(call("max", &[]), Value::Null);
        assert!(call_builtin("sqrt", &[]).is_err());
        assert!(call_builtin("random", &[]).is_err());
        assert!(call_builtin("system", &[n(1.0)]).is_err());
    }
}
