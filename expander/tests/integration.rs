use expander::{
    DataMode, Decoded, DecodedPath, Engine, RuntimeError, TranslateOptions,
};
use proptest::prelude::*;
use rstest::rstest;

fn translate(source: &str) -> String {
    Engine::new().translate(source).expect("translation failed")
}

/// Layout used when parsing model files: data collected into one section.
fn translate_consolidated(source: &str) -> String {
    let options = TranslateOptions {
        data_mode: DataMode::Consolidated,
        comment_cmds: false,
    };
    Engine::new()
        .translate_with(source, options)
        .expect("translation failed")
}

#[test]
fn empty_document() {
    assert_eq!(translate(""), "");
}

#[test]
fn set_from_range() {
    let out = translate("$SET[A]{range(5)};");
    assert_eq!(out, "set A := {0,1,2,3,4};");
}

#[test]
fn sets_of_tuples_and_hidden_sets() {
    let out = translate("$SET[B]{zip(range(3),range(3))};\n$SET[^C]{range(5)};");
    assert!(out.contains("set B := {(0,0),(1,1),(2,2)};"));
    assert!(!out.contains("set C"));
    assert!(!out.contains("^C"));
}

#[test]
fn params() {
    let out = translate_consolidated(
        "$PARAM[NAME]{\"name\"};\n$PARAM[VALUE]{10};\n$PARAM[D{I}]{{'a': 1}};\n\
         $PARAM[L0]{[1,2,3], i0=0};\n$PARAM[L1]{[1,2,3], i0=1};\n$PARAM[^NAME2]{\"something\"};",
    );
    assert!(out.contains("param NAME := 'name';"));
    assert!(out.contains("param VALUE := 10;"));
    assert!(out.contains("param D := ['a']1;"));
    assert!(out.contains("set I := {'a'};"));
    assert!(out.contains("param L0 := [0]1[1]2[2]3;"));
    assert!(out.contains("param L1 := [1]1[2]2[3]3;"));
    assert!(!out.contains("NAME2"));
    assert!(out.ends_with("end;"));
}

#[test]
fn variables_in_declaration_order() {
    let out = translate("$VAR[x]{\"integer\", 0, 10};\n$VAR[y]{\"binary\"};");
    assert_eq!(out, "var x, integer, >= 0, <= 10;\nvar y, binary;");
}

#[test]
fn variables_with_expressions_and_index_sets() {
    let out = translate(
        "$VAR[z]{ub=abs((2**7)//5-135)};\n$VAR[^w]{\"integer\", 0, 10};\n\
         $VAR[xs{I}]{\"integer\", index_set=range(3)};\n$EXEC{VAR['y'](\"binary\")};",
    );
    assert!(out.contains("var z, <= 110;"));
    assert!(!out.contains("var w"));
    assert!(out.contains("set I := {0,1,2};var xs{I}, integer;"));
    assert!(out.contains("var y, binary;"));
}

#[rstest]
#[case(r#"[("x1",5),("x2",15),("x3",10)],">=",20"#)]
#[case(r#"[("x1",5),("x2",15),-20],">=",("x3",-10)"#)]
#[case(r#"[("x1",5)],">=",[("x2",-15),("x3",-10),20]"#)]
#[case(r#"-20,">=",[("x1",-5),("x2",-15),("x3",-10)]"#)]
#[case(r#"-20,">=",[(-5, "x1"),("x2",-15),(-10, "x3")]"#)]
#[case(r#"[-20, "x1"],">=",[(-4, "x1"),("x2",-15),(-10, "x3")]"#)]
#[case(r#""x1",">=",[(-4, "x1"),20,("x2",-15),(-10, "x3")]"#)]
fn equivalent_constraints_are_identical(#[case] body: &str) {
    let out = translate(&format!("$CON[con1]{{{}}};", body));
    assert_eq!(out, "s.t. con1: +5*x1 +15*x2 +10*x3 >= 20;");
}

#[test]
fn cancelling_constraint_keeps_its_variable() {
    assert_eq!(translate(r#"$CON[c]{"x","=","x"};"#), "s.t. c: +0*x = 0;");
}

#[rstest]
#[case(r#"1,"<=",2"#)]
#[case(r#"[1],"<=",2"#)]
#[case(r#"(2,3),">=",[1,(4,5)]"#)]
fn constraints_without_variables_fail(#[case] body: &str) {
    let err = Engine::new()
        .translate(&format!("$CON[c]{{{}}};", body))
        .unwrap_err();
    assert!(matches!(err.error, RuntimeError::ArgumentError(_)));
}

#[test]
fn oversized_repetition_fails() {
    for snippet in ["${len([0] * 10**15)}$", "${len('a' * 10**15)}$"] {
        let err = Engine::new().translate(snippet).unwrap_err();
        assert!(matches!(err.error, RuntimeError::ArgumentError(_)));
    }
    assert_eq!(translate("${len([0, 1] * 3)}$ ${'ab' * 2}$"), "6 abab");
}

#[test]
fn hidden_constraint_is_not_emitted() {
    let out = translate(r#"$CON[^xyz]{[("x1",5)],">=",20};"#);
    assert!(!out.contains("xyz"));
}

#[test]
fn statements_and_exec_variables() {
    let out = translate(
        "$STMT{\"s.t. con1: x + y <= {0} * z;\".format(abs((2**7)//5-135))};\n\
         $EXEC{stmt = \"s.t. {0}: x >= 10;\".format(\"test\")};\n$STMT{stmt};",
    );
    assert!(out.contains("s.t. con1: x + y <= 110 * z;"));
    assert!(out.contains("s.t. test: x >= 10;"));
}

#[test]
fn inline_evaluation() {
    let out = translate("s.t. con1: x + y <= ${abs((2**7)//5-135)}$ * z;\nvar x1, >= ${2+6}$, <= ${10*5}$;");
    assert_eq!(out, "s.t. con1: x + y <= 110 * z;\nvar x1, >= 8, <= 50;");
}

#[test]
fn comments_and_strings_are_not_expanded() {
    let source = "/* ... $SET[A]{range(5)}; ... */\n# $PARAM[VALUE]{10};\n\
                  param a := \"\\\"/*\";\n$PARAM[Y]{10};\nparam b := \"*/\";";
    let options = TranslateOptions {
        data_mode: DataMode::Consolidated,
        comment_cmds: true,
    };
    let out = Engine::new().translate_with(source, options).unwrap();
    assert!(!out.contains("set A"));
    assert!(out.contains("/*IGNORED:... $SET[A]{range(5)}; ...*/"));
    assert!(out.contains("# $PARAM[VALUE]{10};"));
    assert!(!out.contains("param VALUE := 10;"));
    assert!(out.contains("/*EVALUATED:PARAM[Y]{10}*/param Y := 10;"));
    assert!(out.contains("param b := \"*/\";"));
}

#[test]
fn division_error_is_located() {
    let err = Engine::new().translate("var x;\n  $EXEC{ 1/0 };").unwrap_err();
    assert!(matches!(err.error, RuntimeError::DivisionByZero));
    let location = err.location.unwrap();
    assert_eq!((location.line, location.column), (2, 3));
    assert_eq!(
        err.to_string(),
        "division by zero (while evaluating $EXEC{...} at line 2 col 3)"
    );
}

#[test]
fn conflicting_set_declarations() {
    let err = Engine::new()
        .translate("$SET[X]{[1,2,3]};$SET[X]{[1,2]};")
        .unwrap_err();
    assert!(matches!(err.error, RuntimeError::DeclarationConflict { .. }));
}

#[test]
fn repeated_declarations_are_emitted_once() {
    let out = translate("$SET[X]{[1,2]};\n$SET[X]{[1,2]};\n$PARAM[N]{3};$PARAM[N]{3};");
    assert_eq!(out.matches("set X").count(), 1);
    assert_eq!(out.matches("param N").count(), 1);
}

#[test]
fn snippet_errors_abort_the_parse() {
    let mut engine = Engine::new();
    assert!(matches!(
        engine.translate("$SET[X]{0};").unwrap_err().error,
        RuntimeError::TypeError { .. }
    ));
    assert!(matches!(
        engine.translate("$SET[2X]{[1]};").unwrap_err().error,
        RuntimeError::InvalidName(_)
    ));
    assert!(engine.translate("$VBP_FLOW[Z]{100, [10, 10]};").is_err());
}

#[test]
fn deeply_nested_snippets_are_rejected() {
    let nested = |depth: usize| format!("${{{}1{}}}$", "(".repeat(depth), ")".repeat(depth));
    assert_eq!(translate(&nested(20)), "1");

    let err = Engine::new().translate(&nested(1000)).unwrap_err();
    assert!(matches!(err.error, RuntimeError::Syntax(ref message) if message.contains("nested")));
    let err = Engine::new()
        .translate(&format!("$EXEC{{x = {}1{}}};", "[".repeat(1000), "]".repeat(1000)))
        .unwrap_err();
    assert!(matches!(err.error, RuntimeError::Syntax(_)));
}

#[test]
fn every_invocation_gets_its_own_namespace() {
    let mut engine = Engine::new();
    let out = engine
        .translate("$SOS1{['a', 'b']};\n$SOS1{['c', 'd']};")
        .unwrap();
    assert!(out.contains("var _sos10_y_0, binary;"));
    assert!(out.contains("var _sos11_y_0, binary;"));
    assert!(out.contains("s.t. _sos11_c2: +_sos11_y_0 +_sos11_y_1 = 1;"));
    assert_eq!(engine.submodels(), ["SOS1".to_string()]);
}

#[test]
fn flow_extraction_decodes_patterns() {
    let mut engine = Engine::new();
    let out = engine.translate("$VBP_FLOW[Z]{[5], [[5]], [2]};").unwrap();
    assert!(out.contains("var Z, integer, >= 0;"));
    assert_eq!(engine.submodels(), ["VBP_FLOW".to_string()]);

    let lookup = |name: &str| match name {
        "Z" | "_vbp_flow0_f0" | "_vbp_flow0_f2" => 2.0,
        _ => 0.0,
    };
    let decoded: Vec<Decoded> = engine.extract("VBP_FLOW", &lookup).unwrap().collect();
    assert_eq!(
        decoded,
        vec![Decoded {
            variable: "Z".to_string(),
            value: 2.0,
            paths: vec![DecodedPath {
                count: 2,
                labels: vec!["i=1".to_string()],
            }],
        }]
    );
}

#[test]
fn querying_unknown_submodels() {
    let mut engine = Engine::new();
    engine.translate("$SET[A]{[1]};").unwrap();
    assert!(matches!(
        engine.extract("SET", &|_| 0.0),
        Err(RuntimeError::UnknownSubmodel(_))
    ));
    assert!(matches!(
        engine.separate("NOPE", &|_| 0.0),
        Err(RuntimeError::UnknownSubmodel(_))
    ));
}

#[test]
fn data_statements_in_comments_and_strings_are_ignored() {
    let source = "# end; of header\nvar x;\n$PARAM[D]{[1,2]};\nend;\n";
    assert_eq!(
        translate_consolidated(source),
        "# end; of header\nvar x;\nset D_I := {0,1};param D{D_I};\ndata;\nparam D := [0]1[1]2;\nend;\n"
    );

    let source = "/* data; */\nparam s symbolic := \"end;\";\n$PARAM[D]{[1,2]};";
    assert_eq!(
        translate_consolidated(source),
        "/* data; */\nparam s symbolic := \"end;\";\nset D_I := {0,1};param D{D_I};data;\nparam D := [0]1[1]2;\nend;"
    );
}

#[test]
fn parse_reads_and_writes_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("model.mod");
    let output = dir.path().join("model.out.mod");
    std::fs::write(&input, "$PARAM[D]{[1,2]};\nvar x;\nend;\n").unwrap();

    let mut engine = Engine::new();
    let text = engine.parse(Some(&input), Some(&output)).unwrap();
    assert_eq!(
        text,
        "/*EVALUATED:PARAM[D]{[1,2]}*/set D_I := {0,1};param D{D_I};\nvar x;\ndata;\nparam D := [0]1[1]2;\nend;\n"
    );
    assert_eq!(std::fs::read_to_string(&output).unwrap(), format!("{}\n", text));

    // Without an input the previous document is parsed again.
    assert_eq!(engine.parse(None, None).unwrap(), text);
}

#[test]
fn missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Engine::new()
        .parse(Some(&dir.path().join("absent.mod")), None)
        .unwrap_err();
    assert!(matches!(err.error, RuntimeError::IoError(_)));
}

proptest! {
    #[test]
    fn documents_without_markers_are_unchanged(source in "[a-z0-9 ;:=+*/#'\"{}()\\[\\]\n-]{0,200}") {
        prop_assert_eq!(translate(&source), source);
    }
}
