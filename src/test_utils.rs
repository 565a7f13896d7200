use crate::frame::Frame;
use crate::raw::{Raw, Value};

pub(crate) fn lvl(s: &str) -> Value {
    Value::Str(s.to_string())
}

/// A small frame with a normalized continuous column `x0`, a categorical
/// column `x1` over the levels a/b/c, and its one-hot expansion `x2`.
pub(crate) fn letters_frame(keep_raw: bool) -> Frame {
    let mut frame = Frame::new(keep_raw);
    let x0 = Raw::from((0..10).map(|i| i as f64).collect::<Vec<_>>());
    frame.append_cts(&x0, "x0", true, None).unwrap();

    let x1 = Raw::from(
        ["a", "b", "c", "a", "b", "c", "a", "c", "c", "c"]
            .map(String::from)
            .to_vec(),
    );
    frame.append_cat(&x1, "x1", None).unwrap();
    frame.make_one_hot("x1", "x2").unwrap();
    frame
}
