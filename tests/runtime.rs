//! Runtime tests: render real templates and check the produced output
//! byte for byte.
//!
//! Every expected-output case runs twice: once through the JIT executor,
//! and once through a shared object compiled from the emitted C source and
//! loaded back, asserting the two renders are byte-identical. The second
//! half is skipped when no C compiler is available, the same way the
//! engine treats building the shared object as an out-of-band step.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smarttpl::{
    Data, Error, ListValue, MapValue, Modifier, Parameters, Template, Value, VariantValue,
};

/// A compiled template object; the scratch directory lives as long as the
/// loaded library needs the file.
struct SharedObject {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl SharedObject {
    fn path(&self) -> &Path {
        &self.path
    }
}

/// Compiles the template's C form into a shared object with the system C
/// compiler. Returns None when that is not possible, in which case the
/// caller only checks the JIT render.
fn build_shared_object(template: &Template) -> Option<SharedObject> {
    let c_source = template.compile().expect("source templates emit C");
    let dir = tempfile::tempdir().ok()?;
    let c_path = dir.path().join("template.c");
    let so_path = dir.path().join("template.so");
    std::fs::write(&c_path, c_source).ok()?;

    let include = Path::new(env!("CARGO_MANIFEST_DIR")).join("include");
    let mut cc = Command::new("cc");
    cc.arg("-shared")
        .arg("-fPIC")
        .arg("-I")
        .arg(&include)
        .arg("-o")
        .arg(&so_path)
        .arg(&c_path);
    #[cfg(target_os = "macos")]
    cc.arg("-undefined").arg("dynamic_lookup");

    match cc.status() {
        Ok(status) if status.success() => Some(SharedObject { _dir: dir, path: so_path }),
        _ => {
            eprintln!("no usable C compiler, skipping the shared object comparison");
            None
        }
    }
}

/// Renders through the JIT; when a shared object can be built, renders
/// through it as well and asserts both outputs are byte-identical.
fn render_encoded(source: &str, data: &Data, encoding: &str) -> String {
    let template = Template::from_source(source).expect("template should compile");
    let jit = template
        .process_encoded(data, encoding)
        .expect("template should render");

    if let Some(object) = build_shared_object(&template) {
        let loaded = Template::from_library(object.path()).expect("shared object should load");
        let reloaded = loaded
            .process_encoded(data, encoding)
            .expect("shared object should render");
        assert_eq!(
            reloaded, jit,
            "jit and shared object renders must be byte-identical"
        );
    }

    jit
}

fn render(source: &str, data: &Data) -> String {
    render_encoded(source, data, "raw")
}

/// Renders through the JIT only; for cases where a second render would
/// disturb what the test observes (side-effect counters).
fn render_jit(source: &str, data: &Data) -> String {
    Template::from_source(source)
        .expect("template should compile")
        .process(data)
        .expect("template should render")
}

/// Asserts the render fails, on the JIT and on a reloaded shared object
/// alike, and returns the JIT error.
fn render_err(source: &str, data: &Data) -> Error {
    let template = Template::from_source(source).expect("template should compile");
    let err = template.process(data).expect_err("render should fail");

    if let Some(object) = build_shared_object(&template) {
        let loaded = Template::from_library(object.path()).expect("shared object should load");
        let reloaded = loaded
            .process(data)
            .expect_err("shared object render should fail");
        assert_eq!(
            reloaded.to_string(),
            err.to_string(),
            "jit and shared object renders must fail the same way"
        );
    }

    err
}

#[test]
fn raw_text_passthrough() {
    let data = Data::new();
    let source = "no directives at all\n  whitespace } preserved\n";
    assert_eq!(render(source, &data), source);
}

#[test]
fn foreach_over_list() {
    let mut list = ListValue::new();
    for i in 0..5i64 {
        list.add(i);
    }
    let mut data = Data::new();
    data.assign("list", VariantValue::new(list));

    assert_eq!(
        render("{foreach $item in $list}item: {$item}\n{/foreach}", &data),
        "item: 0\nitem: 1\nitem: 2\nitem: 3\nitem: 4\n"
    );
}

#[test]
fn foreach_over_map_with_keys() {
    let mut map = MapValue::new();
    map.assign("1", 1i64).assign("2", 2i64);
    let mut data = Data::new();
    data.assign("map", VariantValue::new(map));

    assert_eq!(
        render("{foreach $map as $k => $v}k:{$k},v:{$v};{/foreach}", &data),
        "k:1,v:1;k:2,v:2;"
    );
}

#[test]
fn foreachelse_on_noniterable_source() {
    let mut data = Data::new();
    data.assign("src", "just a string");
    assert_eq!(
        render("{foreach $l in $src}..{foreachelse}else{/foreach}", &data),
        "else"
    );
}

#[test]
fn foreach_induction_variable_does_not_leak() {
    let mut data = Data::new();
    data.assign("l", vec![1i64, 2, 3]);
    data.assign("i", "outer");
    // the induction $i is restored afterwards, the user assignment $o stays
    assert_eq!(
        render("{foreach $i in $l}{$o=$i}{/foreach}{$i}:{$o}", &data),
        "outer:3"
    );
}

#[test]
fn assignment_survives_the_loop() {
    let mut data = Data::new();
    data.assign("l", vec![0i64, 1, 2, 3, 4]);
    assert_eq!(
        render("{foreach $i in $l}{$o=$i}{/foreach}{$o}", &data),
        "4"
    );
}

#[test]
fn if_with_boolean_literal() {
    let data = Data::new();
    assert_eq!(render("{if true}T{else}F{/if}", &data), "T");
    assert_eq!(render("{if false}T{else}F{/if}", &data), "F");
}

#[test]
fn if_elseif_chain() {
    let source = "{if $v}T{elseif $w}F{/if}";
    let empty = Data::new();
    assert_eq!(render(source, &empty), "");

    let mut with_v = Data::new();
    with_v.assign("v", true);
    assert_eq!(render(source, &with_v), "T");

    let mut with_w = Data::new();
    with_w.assign("w", true);
    assert_eq!(render(source, &with_w), "F");
}

#[test]
fn string_comparisons() {
    let data = Data::new();
    assert_eq!(render("{if \"a\" == \"b\"}t{else}f{/if}", &data), "f");
    assert_eq!(render("{if \"a\" != \"b\"}t{else}f{/if}", &data), "t");
    assert_eq!(
        render("{if \"string\" == \"string\"}t{else}f{/if}", &data),
        "t"
    );
}

#[test]
fn numeric_comparison_with_variable() {
    let source = "{if $var == 1}t{else}f{/if}";
    let mut one = Data::new();
    one.assign("var", 1i64);
    assert_eq!(render(source, &one), "t");

    let mut two = Data::new();
    two.assign("var", 2i64);
    assert_eq!(render(source, &two), "f");
}

#[test]
fn comparison_needs_the_full_64_bits() {
    let mut data = Data::new();
    data.assign("int64", 922337203685477580i64);
    assert_eq!(
        render("{if $int64 > 2147483647}t{else}f{/if}", &data),
        "t"
    );
}

#[test]
fn boolean_comparison() {
    let data = Data::new();
    assert_eq!(render("{if true == true}t{else}f{/if}", &data), "t");
    assert_eq!(render("{if true != false}t{else}f{/if}", &data), "t");
}

#[test]
fn arithmetic() {
    let data = Data::new();
    assert_eq!(render("{1+3-2*10}", &data), "-16");
    assert_eq!(render("{(1+3-2)*10}", &data), "20");
    assert_eq!(render("{1+3*10%5}", &data), "1");
}

#[test]
fn arithmetic_with_variables() {
    let mut data = Data::new();
    data.assign("var", 200i64);
    assert_eq!(render("{10*$var}", &data), "2000");

    let mut data = Data::new();
    data.assign("var", 22i64);
    assert_eq!(render("{10*$var}", &data), "220");
    assert_eq!(render("{$var*$var}", &data), "484");
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let data = Data::new();
    let err = render_err("{1/0}", &data);
    assert!(matches!(err, Error::Runtime(_)));
    assert!(err.to_string().contains("Division by zero"));
}

#[test]
fn assignment_reads_back_in_source_order() {
    let data = Data::new();
    assert_eq!(render("{$var}-{$var=1}-{$var}", &data), "--1");
}

#[test]
fn assign_directive_with_expression() {
    let mut data = Data::new();
    data.assign("v", 456i64);
    assert_eq!(render("{assign $v*11 to $t}{$t}", &data), "5016");
}

#[test]
fn assign_double_keeps_fixed_point_form() {
    let data = Data::new();
    assert_eq!(
        render("{assign 1.5e17 to $t}{$t}", &data),
        "150000000000000000.000000"
    );
}

#[test]
fn array_access_by_position() {
    let mut list = ListValue::new();
    for i in 0..5i64 {
        list.add(i);
    }
    let mut data = Data::new();
    data.assign("list", VariantValue::new(list));
    assert_eq!(render("{$list[3]}", &data), "3");
}

#[test]
fn map_access_by_key_and_dot() {
    let mut map = MapValue::new();
    map.assign("key", "test");
    let mut data = Data::new();
    data.assign("map", VariantValue::new(map));
    assert_eq!(render("{$map[\"key\"]}", &data), "test");
    assert_eq!(render("{$map.key}", &data), "test");
}

#[test]
fn missing_data_is_empty_not_an_error() {
    let data = Data::new();
    assert_eq!(render("[{$does_not_exist}]", &data), "[]");
    assert_eq!(render("[{$a.b.c}]", &data), "[]");
}

#[test]
fn rendering_is_idempotent() {
    let mut data = Data::new();
    data.assign("x", 7i64);
    data.assign("l", vec![1i64, 2]);
    let template =
        Template::from_source("{$x}{foreach $i in $l}{$i}{/foreach}{$x}").unwrap();
    let first = template.process(&data).unwrap();
    let second = template.process(&data).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, "71217");
}

#[test]
fn html_escaping_uses_canonical_entities() {
    let mut data = Data::new();
    data.assign("x", "<b>\"quoted\" & more</b>");

    assert_eq!(
        render_encoded("{$x}", &data, "html"),
        "&lt;b&gt;&quot;quoted&quot; &amp; more&lt;/b&gt;"
    );
    // raw encoding equals the unescaped substitution
    assert_eq!(
        render_encoded("{$x}", &data, "raw"),
        "<b>\"quoted\" & more</b>"
    );
}

#[test]
fn raw_modifier_bypasses_the_escaper() {
    let mut data = Data::new();
    data.assign("x", "<i>");
    assert_eq!(
        render_encoded("{$x|raw}{$x}", &data, "html"),
        "<i>&lt;i&gt;"
    );
}

#[test]
fn builtin_modifiers() {
    let mut data = Data::new();
    data.assign("name", "Smarty");
    data.assign("text", "one\ntwo\nthree");
    data.assign("l", vec![1i64, 2, 3]);
    assert_eq!(render("{$name|toupper}", &data), "SMARTY");
    assert_eq!(render("{$name|tolower}", &data), "smarty");
    assert_eq!(render("{$l|count}", &data), "3");
    assert_eq!(render("{$text|count_paragraphs}", &data), "2");
    assert_eq!(render("{$missing|default:\"n/a\"}", &data), "n/a");
    assert_eq!(render("{$name|tolower|toupper}", &data), "SMARTY");
}

#[test]
fn unknown_modifier_is_a_runtime_error() {
    let mut data = Data::new();
    data.assign("x", "y");
    let err = render_err("{$x|nonsense}", &data);
    assert!(err.to_string().contains("unknown modifier"));
}

/// Counts how often it runs; the transformation itself is identity.
struct Mark(Arc<AtomicUsize>);

impl Modifier for Mark {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        self.0.fetch_add(1, Ordering::SeqCst);
        input.clone()
    }
}

#[test]
fn logical_and_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut data = Data::new();
    data.assign("a", false);
    data.assign("b", true);
    data.modifier("mark", Mark(calls.clone()));

    // the left arm is falsy, so the right arm must never be evaluated
    assert_eq!(
        render_jit("{if $a && $b|mark}T{else}F{/if}", &data),
        "F"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // flip the left arm and the right arm runs exactly once
    let calls = Arc::new(AtomicUsize::new(0));
    let mut data = Data::new();
    data.assign("a", true);
    data.assign("b", true);
    data.modifier("mark", Mark(calls.clone()));
    assert_eq!(render_jit("{if $a && $b|mark}T{else}F{/if}", &data), "T");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn logical_or_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut data = Data::new();
    data.assign("a", true);
    data.assign("b", true);
    data.modifier("mark", Mark(calls.clone()));

    assert_eq!(render_jit("{if $a || $b|mark}T{else}F{/if}", &data), "T");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn short_circuit_holds_in_the_shared_object_too() {
    // one JIT render plus one shared object render; the skipped arm stays
    // skipped in both, so the counter moves at most once
    let calls = Arc::new(AtomicUsize::new(0));
    let mut data = Data::new();
    data.assign("a", false);
    data.assign("b", true);
    data.modifier("mark", Mark(calls.clone()));

    assert_eq!(render("{if $a && $b|mark}T{else}F{/if}", &data), "F");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn modifiers_in_a_pipe_apply_left_to_right() {
    let mut data = Data::new();
    data.assign("x", " Hello ");
    assert_eq!(render("{$x|trim|tolower|ucfirst}", &data), "Hello");
}

#[test]
fn nested_foreach() {
    let mut inner_a = ListValue::new();
    inner_a.add(1i64).add(2i64);
    let mut inner_b = ListValue::new();
    inner_b.add(3i64).add(4i64);
    let mut outer = ListValue::new();
    outer
        .add(VariantValue::new(inner_a))
        .add(VariantValue::new(inner_b));

    let mut data = Data::new();
    data.assign("rows", VariantValue::new(outer));
    assert_eq!(
        render(
            "{foreach $row in $rows}[{foreach $cell in $row}{$cell},{/foreach}]{/foreach}",
            &data
        ),
        "[1,2,][3,4,]"
    );
}

#[test]
fn custom_value_types_plug_in() {
    struct Upper(&'static str);

    impl Value for Upper {
        fn as_string(&self) -> &str {
            self.0
        }
        fn to_numeric(&self) -> i64 {
            0
        }
        fn to_double(&self) -> f64 {
            0.0
        }
        fn to_boolean(&self) -> bool {
            true
        }
    }

    let mut data = Data::new();
    data.assign("v", VariantValue::new(Upper("CUSTOM")));
    assert_eq!(render("{$v}", &data), "CUSTOM");
}

#[test]
fn output_encoding_falls_back_to_raw() {
    let mut data = Data::new();
    data.assign("x", "<>");
    assert_eq!(render_encoded("{$x}", &data, "unknown"), "<>");
}
