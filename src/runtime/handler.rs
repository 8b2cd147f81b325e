//! Per-render state: the output buffer, local variables and the lifetime
//! of every value created while a template runs.

use indexmap::IndexMap;

use crate::data::Data;
use crate::escaper::Escaper;
use crate::modifier::{Modifier, Parameters};
use crate::value::{
    empty, BooleanValue, DoubleValue, NumericValue, StringValue, Value, ValueIterator,
    VariantValue,
};

/// A live iterator plus its storage slot. Boxed by the handler so the
/// pointer handed to generated code stays put.
pub struct IteratorFrame {
    iter: Option<Box<dyn ValueIterator>>,
}

/// A resolved modifier handle: the registered modifier plus the literal
/// parameters that were attached to the pipe.
pub struct ModifierFrame {
    modifier: std::sync::Arc<dyn Modifier>,
    params: Parameters,
}

/// Controller for one render.
///
/// Owns the output buffer and every value created during the render
/// (assigned literals, foreach induction values, modifier outputs); those
/// live until the handler is dropped. The `Data` is only borrowed, the
/// handler never mutates it.
pub struct Handler<'r> {
    /// Rendered output, append-only.
    buffer: String,
    /// The variable and modifier source for this render.
    data: &'r Data,
    /// Encoder applied to escaped value output.
    escaper: &'static dyn Escaper,
    /// Local variables: foreach induction names and `assign` targets.
    /// Lookup hits this before the data binding.
    locals: IndexMap<String, *const VariantValue>,
    /// Values created during this render. Boxed so their addresses are
    /// stable while the vector grows.
    created: Vec<Box<VariantValue>>,
    /// Iterators of the active (and finished) foreach frames.
    iterators: Vec<Box<IteratorFrame>>,
    /// Modifier handles resolved during this render.
    modifiers: Vec<Box<ModifierFrame>>,
    /// First error reported by generated code, if any.
    error: Option<String>,
    /// Non-fatal findings: lookups that resolved to the empty value.
    warnings: Vec<String>,
}

impl<'r> Handler<'r> {
    /// Creates a handler for one render.
    pub fn new(data: &'r Data, escaper: &'static dyn Escaper) -> Self {
        let mut buffer = String::new();
        buffer.reserve(4096);
        Self {
            buffer,
            data,
            escaper,
            locals: IndexMap::new(),
            created: Vec::new(),
            iterators: Vec::new(),
            modifiers: Vec::new(),
            error: None,
            warnings: Vec::new(),
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Appends raw bytes to the output. After a reported error the render
    /// is dead and writes are dropped.
    pub fn write(&mut self, text: &str) {
        if self.error.is_none() {
            self.buffer.push_str(text);
        }
    }

    /// Appends a value's string form, escaped when requested.
    pub fn output(&mut self, value: &VariantValue, escape: bool) {
        if self.error.is_some() {
            return;
        }
        let text = value.as_string();
        if escape {
            let encoded = self.escaper.encode(text);
            self.buffer.push_str(&encoded);
        } else {
            self.buffer.push_str(text);
        }
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Resolves a variable: locals first, then the data binding, then the
    /// shared empty value. Never null; a miss is a recorded warning.
    pub fn variable(&mut self, name: &str) -> *const VariantValue {
        if let Some(ptr) = self.locals.get(name) {
            return *ptr;
        }
        if let Some(value) = self.data.value(name) {
            return value as *const VariantValue;
        }
        self.warn(format!("unresolved variable '{}'", name));
        empty() as *const VariantValue
    }

    /// Binds a local name to an existing value. Same key overwrites.
    pub fn assign(&mut self, name: &str, value: *const VariantValue) {
        self.locals.insert(name.to_string(), value);
    }

    /// Binds a local name to a boolean singleton.
    pub fn assign_boolean(&mut self, name: &str, value: bool) {
        let ptr = BooleanValue::get(value) as *const VariantValue;
        self.locals.insert(name.to_string(), ptr);
    }

    /// Binds a local name to a freshly owned numeric value.
    pub fn assign_numeric(&mut self, name: &str, value: i64) {
        let ptr = self.adopt(VariantValue::new(NumericValue::new(value)));
        self.locals.insert(name.to_string(), ptr);
    }

    /// Binds a local name to a freshly owned double value.
    pub fn assign_double(&mut self, name: &str, value: f64) {
        let ptr = self.adopt(VariantValue::new(DoubleValue::new(value)));
        self.locals.insert(name.to_string(), ptr);
    }

    /// Binds a local name to a freshly owned string value.
    pub fn assign_string(&mut self, name: &str, value: &str) {
        let ptr = self.adopt(VariantValue::new(StringValue::new(value)));
        self.locals.insert(name.to_string(), ptr);
    }

    /// Takes ownership of a value for the rest of the render and returns
    /// its stable address.
    pub fn adopt(&mut self, value: VariantValue) -> *const VariantValue {
        self.created.push(Box::new(value));
        let boxed: &VariantValue = self.created.last().map(|b| &**b).unwrap_or(empty());
        boxed as *const VariantValue
    }

    /// Wraps a runtime-computed integer as an owned value, for writing a
    /// numeric expression as a string.
    pub fn numeric_value(&mut self, value: i64) -> *const VariantValue {
        self.adopt(VariantValue::new(NumericValue::new(value)))
    }

    /// Wraps a runtime-computed double as an owned value.
    pub fn double_value(&mut self, value: f64) -> *const VariantValue {
        self.adopt(VariantValue::new(DoubleValue::new(value)))
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Creates an iterator over a value. A non-iterable source yields a
    /// frame that is invalid from the start, which makes the loop a no-op.
    pub fn create_iterator(&mut self, value: &VariantValue) -> *mut IteratorFrame {
        let iter = if value.member_count() == 0 {
            None
        } else {
            value.iterator()
        };
        self.iterators.push(Box::new(IteratorFrame { iter }));
        match self.iterators.last_mut() {
            Some(frame) => &mut **frame as *mut IteratorFrame,
            None => std::ptr::null_mut(),
        }
    }

    /// Whether the frame still points at a member.
    pub fn valid_iterator(frame: &IteratorFrame) -> bool {
        frame.iter.as_ref().is_some_and(|it| it.valid())
    }

    /// Advances the frame.
    pub fn iterator_next(frame: &mut IteratorFrame) {
        if let Some(it) = frame.iter.as_mut() {
            it.next();
        }
    }

    /// The current value of the frame, adopted for the render.
    pub fn iterator_value(&mut self, frame: *mut IteratorFrame) -> *const VariantValue {
        let current = unsafe { (*frame).iter.as_ref().and_then(|it| it.value()) };
        match current {
            Some(value) => self.adopt(value),
            None => empty() as *const VariantValue,
        }
    }

    /// The current key of the frame, adopted for the render.
    pub fn iterator_key(&mut self, frame: *mut IteratorFrame) -> *const VariantValue {
        let current = unsafe { (*frame).iter.as_ref().and_then(|it| it.key()) };
        match current {
            Some(key) => self.adopt(key),
            None => empty() as *const VariantValue,
        }
    }

    // ========================================================================
    // Modifiers
    // ========================================================================

    /// Resolves a modifier token of the form `name` or `name:arg1,arg2`.
    /// Unknown names are a runtime error and resolve to null.
    pub fn modifier(&mut self, token: &str) -> *mut ModifierFrame {
        let (name, args) = match token.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (token, None),
        };
        let Some(modifier) = self.data.lookup_modifier(name) else {
            self.error(&format!("unknown modifier '{}'", name));
            return std::ptr::null_mut();
        };
        let params = Parameters::new(args.map(parse_parameters).unwrap_or_default());
        self.modifiers.push(Box::new(ModifierFrame { modifier, params }));
        match self.modifiers.last_mut() {
            Some(frame) => &mut **frame as *mut ModifierFrame,
            None => std::ptr::null_mut(),
        }
    }

    /// Applies a resolved modifier to a value. A null handle (unresolved
    /// modifier) passes the value through; the error is already recorded.
    pub fn modify(
        &mut self,
        frame: *const ModifierFrame,
        value: *const VariantValue,
    ) -> *const VariantValue {
        if frame.is_null() || value.is_null() {
            return value;
        }
        let (input, result) = unsafe {
            let input = &*value;
            let frame = &*frame;
            (input, frame.modifier.apply(input, &frame.params))
        };
        if result.ptr_eq(input) {
            value
        } else {
            self.adopt(result)
        }
    }

    // ========================================================================
    // Errors and results
    // ========================================================================

    /// Records a runtime fault; the first one wins and kills the render.
    pub fn error(&mut self, message: &str) {
        if self.error.is_none() {
            log::debug!("render failed: {}", message);
            self.error = Some(message.to_string());
        }
    }

    /// Records a non-fatal finding; the render continues with the empty
    /// value in place of whatever was missing.
    pub fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Non-fatal findings collected during the render.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether a runtime fault was recorded.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// The recorded fault, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The rendered output.
    pub fn into_output(self) -> String {
        self.buffer
    }
}

/// Parses the serialized literal arguments of a modifier token.
fn parse_parameters(args: &str) -> Vec<VariantValue> {
    let mut out = Vec::new();
    let bytes = args.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] == b'"' {
            // quoted string with backslash escapes
            pos += 1;
            let mut text = Vec::new();
            while pos < bytes.len() && bytes[pos] != b'"' {
                if bytes[pos] == b'\\' && pos + 1 < bytes.len() {
                    pos += 1;
                }
                text.push(bytes[pos]);
                pos += 1;
            }
            pos += 1; // closing quote
            out.push(VariantValue::from(
                String::from_utf8_lossy(&text).into_owned(),
            ));
        } else {
            let end = args[pos..]
                .find(',')
                .map(|offset| pos + offset)
                .unwrap_or(args.len());
            let word = &args[pos..end];
            out.push(parse_bare_parameter(word));
            pos = end;
        }
        // step over the separator
        if pos < bytes.len() && bytes[pos] == b',' {
            pos += 1;
        }
    }

    out
}

fn parse_bare_parameter(word: &str) -> VariantValue {
    match word {
        "true" => return VariantValue::from(true),
        "false" => return VariantValue::from(false),
        "null" => return empty().clone(),
        _ => {}
    }
    if let Ok(int) = word.parse::<i64>() {
        return VariantValue::from(int);
    }
    if let Ok(float) = word.parse::<f64>() {
        return VariantValue::from(float);
    }
    VariantValue::from(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escaper;

    fn handler(data: &Data) -> Handler<'_> {
        Handler::new(data, escaper::get("raw"))
    }

    #[test]
    fn locals_shadow_data() {
        let mut data = Data::new();
        data.assign("x", 1i64);
        let mut h = handler(&data);

        let from_data = h.variable("x");
        assert_eq!(unsafe { (*from_data).to_numeric() }, 1);

        h.assign_numeric("x", 2);
        let local = h.variable("x");
        assert_eq!(unsafe { (*local).to_numeric() }, 2);
    }

    #[test]
    fn missing_variable_is_empty_not_null() {
        let data = Data::new();
        let mut h = handler(&data);
        let ptr = h.variable("missing");
        assert!(!ptr.is_null());
        assert_eq!(unsafe { (*ptr).as_string() }, "");
        assert_eq!(h.warnings().len(), 1);
        assert!(!h.failed());
    }

    #[test]
    fn first_error_wins_and_stops_output() {
        let data = Data::new();
        let mut h = handler(&data);
        h.write("kept");
        h.error("first");
        h.error("second");
        h.write("dropped");
        assert_eq!(h.error_message(), Some("first"));
        assert_eq!(h.into_output(), "kept");
    }

    #[test]
    fn iterator_over_noniterable_is_invalid() {
        let data = Data::new();
        let mut h = handler(&data);
        let source = VariantValue::from("scalar");
        let frame = h.create_iterator(&source);
        assert!(!Handler::valid_iterator(unsafe { &*frame }));
    }

    #[test]
    fn modifier_token_with_parameters() {
        let params = parse_parameters("\"n/a\",3,true");
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].as_string(), "n/a");
        assert_eq!(params[1].to_numeric(), 3);
        assert!(params[2].to_boolean());
    }

    #[test]
    fn unknown_modifier_records_error() {
        let data = Data::new();
        let mut h = handler(&data);
        let frame = h.modifier("nonsense");
        assert!(frame.is_null());
        assert!(h.failed());
    }
}
