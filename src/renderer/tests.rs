use super::*;
use crate::provider::MapContentProvider;
use std::sync::Arc;

const BASE_DIR: &str = "./src/renderer/tests";

fn provider(pages: &[(&str, &str)]) -> MapContentProvider {
    let mut provider = MapContentProvider::default();
    for (name, content) in pages {
        provider.insert(name, *content);
    }
    provider
}

fn engine(pages: &[(&str, &str)]) -> Engine {
    Engine::new(Configuration::default(), provider(pages))
}

fn expand(engine: &Engine, text: &str) -> String {
    let mut model = Model::new(engine, "Test page");
    model.parse_templates(text)
}

#[test]
fn parameters() {
    let engine = engine(&[
        ("Template:Greet", "Hi {{{name|nobody}}} and {{{1}}}."),
        ("Template:N", "[{{{a}}}]"),
    ]);
    assert_eq!(
        expand(&engine, "{{Greet| x |name= Bob }}"),
        "Hi Bob and  x .",
        "named values are trimmed, positional values are not"
    );
    assert_eq!(
        expand(&engine, "{{Greet}}"),
        "Hi nobody and {{{1}}}.",
        "unbound parameters without defaults stay as text"
    );
    assert_eq!(
        expand(&engine, "{{Greet|{{lc:NAME}}=Ann|y}}"),
        "Hi Ann and y.",
        "parameter names are expanded"
    );
    assert_eq!(expand(&engine, "{{{1|top}}}"), "top", "defaults apply at the top level");

    assert_eq!(
        expand(&engine, "{{N|a=  x  \n}}"),
        "[x  \n]",
        "a trailing line break survives trimming"
    );
}

#[test]
fn missing_and_invalid_templates() {
    let engine = engine(&[]);
    let mut model = Model::new(&engine, "Test page");
    assert_eq!(
        model.parse_templates("a {{No such}} b"),
        "a [[:Template:No such]] b"
    );
    assert!(model.templates().contains("No such"));
    assert_eq!(expand(&engine, "{{a[b}}"), "{{a[b}}");
}

#[test]
fn inclusion_control() {
    let text = "a<noinclude>doc</noinclude><includeonly>b</includeonly>";
    let engine = engine(&[("Template:Doc", text)]);
    assert_eq!(expand(&engine, "{{Doc}}"), "ab");
    assert_eq!(expand(&engine, text), "adoc");
}

#[test]
fn parser_functions() {
    let engine = engine(&[]);
    let cases = [
        ("{{#if: x | yes | no }}", "yes"),
        ("{{#if: | yes | no }}", "no"),
        ("{{#ifeq: 01 | 1 | same | different}}", "same"),
        ("{{#switch: b | a = 1 | b = 2 | #default = 3}}", "2"),
        ("{{#switch: z | a = 1 | #default = 3}}", "3"),
        ("{{#expr: 1 + 2 * 3}}", "7"),
        ("{{#ifexpr: 2 > 1 | big | small}}", "big"),
        ("{{uc:abc}}", "ABC"),
        ("{{LC:ABC}}", "abc"),
        ("{{ucfirst:abc}}", "Abc"),
        ("{{lcfirst:ABC}}", "aBC"),
        ("{{formatnum:1234567}}", "1,234,567"),
        ("{{formatnum:1,234|R}}", "1234"),
        ("{{padleft:7|3}}", "007"),
        ("{{padleft:7|4|ab}}", "aba7"),
        ("{{ns:10}}", "Template"),
        ("{{ns:nope}}", "[[:Template:Ns:nope]]"),
    ];
    for (text, expected) in cases {
        assert_eq!(expand(&engine, text), expected, "{text}");
    }

    assert_eq!(
        expand(&engine, "{{padleft:x|20000000}}").len(),
        500,
        "padding length is capped"
    );
    assert_eq!(expand(&engine, "{{#expr: -9223372036854775808 mod -1}}"), "0");

    assert!(
        expand(&engine, "{{#expr: 1 +}}").starts_with(r#"<div class="error">Expression error: "#),
        "expression errors are inline"
    );
}

#[test]
fn magic_words() {
    let engine = engine(&[]);
    let mut model = Model::new(&engine, "Help:Foo bar/Sub");
    assert_eq!(
        model.parse_templates("{{PAGENAME}}, {{NAMESPACE}}, {{SUBPAGENAME}}"),
        "Foo bar/Sub, Help, Sub"
    );
    assert!(model.templates().is_empty(), "magic words are not templates");
}

#[test]
fn magic_literals() {
    let engine = engine(&[("Template:Id", "{{{1}}}")]);
    assert_eq!(expand(&engine, "{{!}}{{=}}"), "|=");
    assert_eq!(
        expand(&engine, "{{Id|a{{!}}b}}"),
        "a|b",
        "a literal pipe does not split an argument"
    );
}

#[test]
fn template_loops() {
    let engine = engine(&[
        ("Template:Loop", "a{{Loop}}"),
        ("Template:A", "{{B}}"),
        ("Template:B", "{{A}}"),
    ]);
    let mut model = Model::new(&engine, "Test page");
    assert_eq!(
        model.parse_templates("{{Loop}}"),
        r#"a<span class="error">Template loop detected: <strong class="selflink">Template:Loop</strong></span>"#
    );
    assert_eq!(
        model.parse_templates("{{A}}"),
        r#"<span class="error">Template loop detected: <strong class="selflink">Template:A</strong></span>"#
    );
    assert!(
        model.in_flight.values().all(|&count| count == 0),
        "in-flight counts should be restored"
    );
}

#[test]
fn recursion_limit() {
    let _ = env_logger::try_init();
    let pages = [
        ("Template:A1", "{{A2}}"),
        ("Template:A2", "{{A3}}"),
        ("Template:A3", "x{{A4}}"),
    ];
    assert_eq!(expand(&engine(&pages), "{{A1}}"), "x[[:Template:A4]]");

    let config = Configuration {
        template_recursion_limit: 3,
        ..Default::default()
    };
    let engine = Engine::new(config, provider(&pages));
    let mut model = Model::new(&engine, "Test page");
    assert_eq!(
        model.parse_templates("{{A1}}"),
        preprocess::RECURSION_LIMIT_MESSAGE
    );
    assert_eq!(model.depth.template, 0, "depth should be restored");
}

#[test]
fn cache() {
    let pages = Arc::new(provider(&[("Template:T", "t{{{1}}}"), ("Page", "p")]));
    let cache = TemplateCache::new(1 << 20);
    let engine = Engine::new(Configuration::default(), Arc::clone(&pages)).with_cache(cache.clone());

    assert_eq!(expand(&engine, "{{T|a}}{{T|a}}{{T|b}}"), "tatatb");
    assert_eq!(pages.fetch_count(), 2, "repeated calls should hit the cache");
    assert_eq!(cache.len(), 2);

    let mut model = Model::new(&engine, "Test page");
    assert_eq!(model.parse_templates("{{T|a}}"), "ta");
    assert_eq!(pages.fetch_count(), 2, "the cache is shared between renders");
    assert!(model.templates().contains("T"), "cached calls are still recorded");

    let mut model = Model::new(&engine, "Test page");
    assert_eq!(model.parse_templates("{{:Page}}{{:Page}}"), "pp");
    assert_eq!(pages.fetch_count(), 4, "only template calls are cached");
    assert!(model.includes().contains("Page"));
    assert!(model.templates().is_empty());
}

#[test]
fn subst() {
    let engine = engine(&[("Template:Hello", "Hello {{{1|world}}}!")]);
    assert_eq!(expand(&engine, "{{subst:hello|you}}"), "Hello you!");
    assert_eq!(
        expand(&engine, "{{subst:Missing}}"),
        "<nowiki>{{subst:Missing}}</nowiki>",
        "an unsubstituted subst is emitted as-is"
    );
    assert_eq!(
        expand(&engine, "{{safesubst:Missing}}"),
        "[[:Template:Missing]]",
        "an unsubstituted safesubst is an ordinary transclusion"
    );
}

#[test]
fn redirects() {
    let engine = engine(&[
        ("Template:Old", "#REDIRECT [[Template:New]]"),
        ("Template:New", "new {{{1}}}"),
    ]);
    let mut model = Model::new(&engine, "Test page");
    assert_eq!(model.parse_templates("{{Old|x}}"), "new x");
    assert!(model.templates().contains("Old"));

    let nodes = model.render("#REDIRECT [[target page]]");
    assert_eq!(model.redirect(), Some("Target page"));
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].text_content(), "#REDIRECT Target page");
    assert_eq!(
        model.render_html("#redirect [[Target page]]"),
        r#"<div class="redirectMsg">#REDIRECT <a href="/wiki/Target_page" title="Target page">Target page</a></div>"#
    );

    model.render("not a redirect");
    assert_eq!(model.redirect(), None, "state is reset between renders");
}

#[test]
fn signatures() {
    let engine = engine(&[]);
    assert_eq!(expand(&engine, "a ~~~~ b ~~"), "a ~~~~ b ~~", "echoed without a user");

    let config = Configuration {
        signature: Some("Alice".into()),
        ..Default::default()
    };
    let engine = Engine::new(config, MapContentProvider::default());
    assert_eq!(expand(&engine, "~~~"), "[[User:Alice|Alice]]");
    assert!(expand(&engine, "~~~~").starts_with("[[User:Alice|Alice]] "));
    let time = expand(&engine, "~~~~~~~");
    assert!(time.starts_with("~~") && !time.contains("User"), "{time}");
}

fn shout(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
    Ok(call
        .eval(model, 0)?
        .map(|value| format!("{}!", value.to_uppercase())))
}

fn fail(_: &FunctionCall<'_>, _: &mut Model<'_>) -> Result<Option<String>> {
    Err(Error::Function("it broke".into()))
}

#[test]
fn user_functions() {
    let mut engine = engine(&[]);
    engine.register_function("#shout", shout);
    engine.register_function("#fail", fail);
    assert_eq!(expand(&engine, "{{#SHOUT: hi }}"), "HI!");
    assert_eq!(
        expand(&engine, "{{#fail: x}}"),
        r#"<span class="error">FunctionError in #fail: it broke</span>"#
    );

    assert_eq!(expand(&engine, "{{lc:abc}}"), "abc");
    engine.register_function("LC", shout);
    assert_eq!(expand(&engine, "{{lc:abc}}"), "ABC!", "user functions shadow built-ins");
}

#[test]
fn side_lists() {
    let engine = engine(&[("Template:T", "t{{{1}}}")]);
    let mut model = Model::new(&engine, "Test page");
    model.render(
        "[[Foo]] [[wiktionary:word]] [[Category:Things|Key]] [[File:Pic.png|thumb|A pic]] {{T|a}}",
    );
    assert!(model.links().contains("Foo"));
    assert!(model.interwiki_links().contains("wiktionary:word"));
    assert_eq!(model.categories().get("Things").map(String::as_str), Some("Key"));
    assert!(model.images().contains("Pic.png"));
    assert!(model.templates().contains("T"));
}

#[test]
fn semantic_links() {
    let config = Configuration {
        semantic_web: true,
        ..Default::default()
    };
    let engine = Engine::new(config, MapContentProvider::default());
    let mut model = Model::new(&engine, "Test page");
    let nodes = model.render("[[located in::Paris]] [[population:=2,000]]");
    assert_eq!(model.relations(), [("located in".to_string(), "Paris".to_string())]);
    assert_eq!(
        model.semantic_attributes(),
        [("population".to_string(), "2,000".to_string())]
    );
    assert!(model.links().contains("Paris"));
    assert_eq!(nodes[0].text_content(), "Paris 2,000");
}

#[test]
fn value_and_buffer_limits() {
    let pages = [
        ("Template:V", "[{{{1}}}]"),
        ("Template:B", "{{{1}}}-{{{1}}}-{{{1}}}-{{{1}}}"),
    ];
    let config = Configuration {
        template_value_limit: 4,
        template_buffer_limit: 10,
        ..Default::default()
    };
    let engine = Engine::new(config, provider(&pages));

    assert_eq!(expand(&engine, "{{V|abc}}"), "[abc]");
    assert_eq!(
        expand(&engine, "{{V|abcdefgh}}"),
        "[{{{1}}}]",
        "oversized values are not interpolated"
    );
    assert_eq!(
        expand(&engine, "{{B|abc}}"),
        "abc-abc-abc",
        "substitution stops once the output passes the limit"
    );
}

#[test]
fn nested_label_limit() {
    let text = "[[A|[[B|[[C|'''x''']]]]]]";
    let label_text = |engine: &Engine| {
        let mut model = Model::new(engine, "Test page");
        model.render(text).iter().map(Node::text_content).collect::<String>()
    };

    assert_eq!(label_text(&engine(&[])), "x");

    let config = Configuration {
        parser_recursion_limit: 2,
        ..Default::default()
    };
    let engine = Engine::new(config, provider(&[]));
    assert_eq!(
        label_text(&engine),
        "'''x'''",
        "labels nested past the limit are kept as text"
    );
    let mut model = Model::new(&engine, "Test page");
    model.render(text);
    assert_eq!(model.depth.parser, 0, "depth should be restored");
}

#[test]
fn deep_nesting() {
    let engine = engine(&[]);
    let mut model = Model::new(&engine, "Test page");
    let html = model.render_html(&format!("{}x", "<span>".repeat(100_000)));
    let count = html.matches("<span>").count();
    assert!(
        (1..=tags::MAX_DEPTH).contains(&count),
        "nesting should be capped, got {count}"
    );
    assert!(html.contains('x'));
}

#[test]
fn concurrent_renders() {
    let engine = engine(&[("Template:T", "t{{{1}}}")]).with_cache(TemplateCache::new(1 << 20));
    std::thread::scope(|scope| {
        let handles = (0..4)
            .map(|index| {
                let engine = &engine;
                scope.spawn(move || {
                    let mut model = Model::new(engine, format!("Page {index}"));
                    model.parse_templates(&format!("{{{{T|{index}}}}} {{{{PAGENAME}}}}"))
                })
            })
            .collect::<Vec<_>>();
        for (index, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), format!("t{index} Page {index}"));
        }
    });
}

macro_rules! run_tests {
    ($($name:ident),* $(,)?) => {
        $(#[test]
        fn $name() {
            run_test(
                stringify!($name),
                include_str!(concat!("./tests/", stringify!($name), ".wiki"))
            );
        })*
    }
}

#[track_caller]
fn run_test(test_name: &str, input: &str) {
    use std::io::Write as _;

    let engine = engine(&[(
        "Template:Infobox",
        "{| class=\"infobox\"\n! {{{name}}}\n|-\n| Size || {{{size|?}}}\n|}",
    )]);
    let mut model = Model::new(&engine, "Test page");
    let mut mint = goldenfile::Mint::new(format!("{BASE_DIR}/goldenfiles"));
    let mut file = mint.new_goldenfile(format!("{test_name}.html")).unwrap();
    let result = model.render_html(input);
    let _ = writeln!(file, "{result}");
}

run_tests! {
    basic,
    references,
    templates,
    toc,
}
