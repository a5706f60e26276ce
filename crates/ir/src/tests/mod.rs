use super::*;
use serde_json::Value as JsonValue;

fn loc(line: usize, column: usize) -> Location {
    Location { line, column }
}

/// Builds `class A { function f() { echo $this->p; } }` by hand.
fn sample() -> (FileAst, NodeId, NodeId, NodeId) {
    let mut ast = FileAst::new("a.php".into());
    let root = ast.root();
    let class = ast.push(
        Some(root),
        NodeKind::ClassDecl {
            name: Some("A".into()),
            parent: None,
            interfaces: vec![],
            is_abstract: false,
        },
        loc(1, 1),
    );
    let method = ast.push(
        Some(class),
        NodeKind::MethodDecl {
            name: "f".into(),
            visibility: Some(Visibility::Public),
            is_static: false,
            is_abstract: false,
            params: vec![],
        },
        loc(1, 11),
    );
    let body = ast.push(Some(method), NodeKind::Block, loc(1, 24));
    let echo = ast.push(Some(body), NodeKind::Echo, loc(1, 26));
    let fetch = ast.push(
        Some(echo),
        NodeKind::PropertyFetch {
            property: Some("p".into()),
            nullsafe: false,
        },
        loc(1, 31),
    );
    ast.push(Some(fetch), NodeKind::Variable { name: "this".into() }, loc(1, 31));
    ast.push(Some(fetch), NodeKind::Name { value: "p".into() }, loc(1, 38));
    (ast, class, method, fetch)
}

#[test]
fn ids_match_arena_positions_and_parents_are_indexed() {
    let (ast, class, method, fetch) = sample();
    for (i, n) in ast.nodes.iter().enumerate() {
        assert_eq!(n.id, i);
    }
    assert_eq!(ast.parent(ast.root()), None);
    assert_eq!(ast.parent(class), Some(ast.root()));
    assert_eq!(ast.parent(method), Some(class));
    assert_eq!(ast.child(fetch, 1).and_then(|c| ast.kind(c)).map(|k| k.name()), Some("Name"));
}

#[test]
fn traverse_is_pre_order_and_reports_parents() {
    let (ast, ..) = sample();
    let mut seen = Vec::new();
    ast.traverse(ast.root(), |n, p| seen.push((n.id, p.map(|p| p.id))));
    let ids: Vec<_> = seen.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (0..ast.len()).collect::<Vec<_>>());
    assert_eq!(seen[0].1, None);
    assert!(seen[1..].iter().all(|(_, p)| p.is_some()));
}

#[test]
fn enclosing_finds_nearest_matching_ancestor() {
    let (ast, class, method, fetch) = sample();
    let m = ast.enclosing(fetch, |k| matches!(k, NodeKind::MethodDecl { .. }));
    assert_eq!(m, Some(method));
    let c = ast.enclosing(fetch, |k| matches!(k, NodeKind::ClassDecl { .. }));
    assert_eq!(c, Some(class));
    assert_eq!(ast.enclosing(class, |k| matches!(k, NodeKind::Echo)), None);
}

#[test]
fn find_by_kind_and_location() {
    let (ast, _, _, fetch) = sample();
    assert_eq!(ast.find_by_kind(ast.root(), "PropertyFetch"), vec![fetch]);
    assert!(ast.find_by_kind(ast.root(), "Call").is_empty());
    assert_eq!(ast.location_of(fetch), Some(loc(1, 31)));
    assert_eq!(ast.location_of(9999), None);
    assert_eq!(loc(3, 7).to_string(), "3:7");
}

#[test]
fn error_nodes_are_counted() {
    let mut ast = FileAst::new("bad.php".into());
    let root = ast.root();
    ast.push(Some(root), NodeKind::Error, loc(2, 1));
    ast.push(Some(root), NodeKind::Error, loc(3, 1));
    assert_eq!(ast.error_count, 2);
    assert!(!ast.is_empty());
}

#[test]
fn json_export_preserves_kinds_and_locations() {
    let (ast, ..) = sample();
    let json = ast.to_json().unwrap();
    let v: JsonValue = serde_json::from_str(&json).unwrap();
    assert_eq!(v["file_path"], "a.php");
    assert_eq!(v["nodes"][1]["kind"]["ClassDecl"]["name"], "A");
    assert_eq!(v["nodes"][2]["kind"]["MethodDecl"]["visibility"], "public");
    assert_eq!(v["nodes"][5]["location"]["column"], 31);

    let back: FileAst = serde_json::from_str(&json).unwrap();
    assert_eq!(back.len(), ast.len());
    assert_eq!(back.parent(5), ast.parent(5));
}
