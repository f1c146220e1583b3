use serde_json::{Number, Value};

/// Deep structural equality used to decide whether a merge writes.
///
/// Sequences compare by length and pairwise, maps by key set and pairwise
/// values. Numbers compare by numeric value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
    (Value::Array(x), Value::Array(y)) => {
      x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
    }
    (Value::Object(x), Value::Object(y)) => {
      x.len() == y.len()
        && x
          .iter()
          .all(|(key, l)| y.get(key).is_some_and(|r| values_equal(l, r)))
    }
    _ => a == b,
  }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
  if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
    return l == r;
  }
  if let (Some(l), Some(r)) = (x.as_u64(), y.as_u64()) {
    return l == r;
  }
  match (x.as_f64(), y.as_f64()) {
    (Some(l), Some(r)) => l == r,
    _ => false,
  }
}
