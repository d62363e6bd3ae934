use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use schematron::{compile_schema, validate, validate_batch, CompileOptions};

const SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
    <ns prefix="c" uri="http://www.amazing-cargo.com/xml/data/2023"/>
    <let name="max_weight" value="300"/>
    <pattern id="weights">
        <rule context="c:item">
            <assert test="number(@weight) le $max_weight">Weight not correct</assert>
            <assert test="@unit = ('kg', 'g')">Unknown unit <value-of select="@unit"/></assert>
        </rule>
    </pattern>
    <pattern id="totals">
        <let name="total" value="sum(//c:item/@weight)"/>
        <rule context="c:cargo">
            <report test="$total gt 100000">Cargo total <value-of select="$total"/></report>
        </rule>
    </pattern>
</schema>"#;

fn manifest(items: usize) -> String {
    let mut out = String::from(r#"<c:cargo xmlns:c="http://www.amazing-cargo.com/xml/data/2023">"#);
    for i in 0..items {
        out.push_str(&format!(
            r#"<c:item weight="{}" unit="kg"><c:name>item {}</c:name></c:item>"#,
            (i * 37) % 400,
            i
        ));
    }
    out.push_str("</c:cargo>");
    out
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_schema", |b| {
        b.iter(|| compile_schema(black_box(SCHEMA), &CompileOptions::new()).unwrap())
    });
}

fn bench_validate(c: &mut Criterion) {
    let schema = compile_schema(SCHEMA, &CompileOptions::new()).unwrap();
    let mut group = c.benchmark_group("validate");
    for items in [10, 100, 1000] {
        let text = manifest(items);
        let document = roxmltree::Document::parse(&text).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(items), &document, |b, doc| {
            b.iter(|| validate(&schema, black_box(doc)))
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let schema = compile_schema(SCHEMA, &CompileOptions::new()).unwrap();
    let texts: Vec<String> = (0..32).map(|_| manifest(200)).collect();
    let documents: Vec<_> = texts
        .iter()
        .map(|t| roxmltree::Document::parse(t).unwrap())
        .collect();

    c.bench_function("validate_batch_32x200", |b| {
        b.iter(|| validate_batch(&schema, black_box(&documents)))
    });
}

criterion_group!(benches, bench_compile, bench_validate, bench_batch);
criterion_main!(benches);
