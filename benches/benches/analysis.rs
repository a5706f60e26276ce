use criterion::{black_box, criterion_group, criterion_main, Criterion};
use engine::{analyze, synthesize_payload, AnalysisOptions, SourceUnit};
use parsers::parse_php;

/// A library of `width` independent hop chains, each `depth` classes long,
/// ending in `system()`, plus one controlled unserialize() call.
fn gadget_library(width: usize, depth: usize) -> Vec<SourceUnit> {
    let mut units = Vec::new();
    for w in 0..width {
        let mut src = String::from("<?php\n");
        for d in 0..depth {
            let name = format!("G{w}_{d}");
            if d + 1 == depth {
                src.push_str(&format!(
                    "class {name} {{ public $cmd; function __toString() {{ system($this->cmd); return ''; }} }}\n"
                ));
            } else if d == 0 {
                src.push_str(&format!(
                    "class {name} {{ public $next; function __destruct() {{ echo $this->next; }} }}\n"
                ));
            } else {
                src.push_str(&format!(
                    "class {name} {{ public $next; function __toString() {{ return 'x' . $this->next; }} }}\n"
                ));
            }
        }
        let id = format!("lib/g{w}.php");
        let ast = parse_php(&src, &id).expect("parse fixture");
        units.push(SourceUnit::new(id, ast));
    }
    let entry = "<?php\n$o = unserialize(base64_decode($_POST['state']));\n";
    units.push(SourceUnit::new(
        "index.php",
        parse_php(entry, "index.php").expect("parse entry"),
    ));
    units
}

fn bench_parser(c: &mut Criterion) {
    let src: String = (0..200)
        .map(|i| {
            format!(
                "class C{i} {{ private $a; protected $b = 1; function __destruct() {{ $this->a->run($this->b); }} }}\n"
            )
        })
        .collect();
    let src = format!("<?php\nnamespace App;\n{src}");
    c.bench_function("parse_php_200_classes", |b| {
        b.iter(|| parse_php(black_box(&src), "bench.php").unwrap())
    });
}

fn bench_analysis(c: &mut Criterion) {
    let opts = AnalysisOptions {
        skip_payloads: true,
        ..AnalysisOptions::default()
    };
    for (name, width, depth) in [("analyze_wide", 40, 2), ("analyze_deep", 5, 5)] {
        let units = gadget_library(width, depth);
        c.bench_function(name, |b| {
            b.iter(|| analyze(black_box(&units), black_box(&opts)))
        });
    }
}

fn bench_payloads(c: &mut Criterion) {
    let units = gadget_library(10, 4);
    let opts = AnalysisOptions::default();
    let report = analyze(&units, &opts);
    c.bench_function("synthesize_payloads", |b| {
        b.iter(|| {
            for f in &report.chains {
                let _ = synthesize_payload(
                    black_box(&f.chain),
                    black_box(&report.catalogue),
                    &opts.payload,
                );
            }
        })
    });
}

criterion_group!(benches, bench_parser, bench_analysis, bench_payloads);
criterion_main!(benches);
