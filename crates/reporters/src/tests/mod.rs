use engine::{analyze, AnalysisOptions, AnalysisReport, SourceUnit};

mod print_report;

pub(crate) fn sample_report() -> AnalysisReport {
    let src = r#"<?php
class Exec {
    public $cmd;
    function __destruct() { system($this->cmd); }
}
class Guarded {
    public $path;
    public $body;
    function __wakeup() { throw new Exception('no'); }
    function __destruct() { file_put_contents($this->path, $this->body); }
}
unserialize($_GET['data']);
"#;
    let unit = SourceUnit::new("app.php", parsers::parse_php(src, "app.php").unwrap());
    analyze(&[unit], &AnalysisOptions::default())
}
