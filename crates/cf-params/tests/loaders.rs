use cf_params::{ParamError, ParamLimits, ParameterSet, parse_ini, parse_json, parse_yaml};
use proptest::prelude::*;

#[test]
fn ini_with_comments_and_blank_lines() {
    let text = "# cosmology\nh = 0.67\n\nomega_b = 0.0224 # baryons\noutput = tCl,pCl\n";
    let mut set = parse_ini("base.ini", text).unwrap();
    assert_eq!(set.len(), 3);
    assert_eq!(set.source_tag(), "base.ini");
    assert_eq!(set.f64_or("omega_b", 0.0).unwrap(), 0.0224);
    assert_eq!(set.words("output"), vec!["tCl", "pCl"]);
}

#[test]
fn ini_line_without_equals_is_a_syntax_error() {
    let err = parse_ini("bad.ini", "h = 0.7\nlensing\n").unwrap_err();
    match err {
        ParamError::Syntax { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn yaml_scalars_and_lists() {
    let text = "h: 0.7\nlensing: true\noutput: [tCl, lCl]\nl_max_scalars: 1200\n";
    let mut set = parse_yaml("run.yaml", text).unwrap();
    assert!(set.flag_or("lensing", false).unwrap());
    assert_eq!(set.words("output"), vec!["tCl", "lCl"]);
    assert_eq!(set.usize_or("l_max_scalars", 0).unwrap(), 1200);
    // insertion order survives
    let names: Vec<&str> = set.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["h", "lensing", "output", "l_max_scalars"]);
}

#[test]
fn json_object_loads() {
    let mut set = parse_json("run.json", r#"{"h": 0.68, "non_linear": "halofit"}"#).unwrap();
    assert_eq!(set.f64_or("h", 0.0).unwrap(), 0.68);
    assert_eq!(set.string_or("non_linear", "none"), "halofit");
    assert!(set.unused().is_empty());
}

#[test]
fn nested_yaml_values_are_rejected() {
    let err = parse_yaml("nested.yaml", "background:\n  h: 0.7\n").unwrap_err();
    assert!(matches!(err, ParamError::Malformed { .. }));
}

#[test]
fn ini_round_trip_through_to_ini() {
    let set = parse_ini("a.ini", "h = 0.7\nYHe = 0.25\n").unwrap();
    let again = parse_ini("b.ini", &set.to_ini()).unwrap();
    assert_eq!(again.peek("YHe"), Some("0.25"));
}

#[test]
fn wider_limits_accept_long_paths() {
    let root = format!("/tmp/{}/", "run".repeat(20));
    let limits = ParamLimits {
        max_value_len: 4096,
        ..ParamLimits::default()
    };
    let mut set = ParameterSet::with_limits("cli", limits);
    set.insert("root", &root).unwrap();
    assert_eq!(set.peek("root"), Some(root.as_str()));
    assert!(ParameterSet::new("cli").insert("root", &root).is_err());
}

proptest! {
    #[test]
    fn to_ini_reloads_the_same_entries(
        entries in prop::collection::btree_map("[a-z][a-z0-9_]{0,15}", "[A-Za-z0-9.,+-]{1,30}", 1..20)
    ) {
        let mut set = ParameterSet::new("generated");
        for (name, value) in &entries {
            set.insert(name, value).unwrap();
        }
        let again = parse_ini("again.ini", &set.to_ini()).unwrap();
        let reloaded: Vec<(&str, &str)> = again
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        let expected: Vec<(&str, &str)> = entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect();
        prop_assert_eq!(reloaded, expected);
    }
}
