use std::collections::HashMap;

use rstest::rstest;
use winstr::*;

#[test]
fn wide_roundtrip() {
    let buf = to_wide("Hello!");
    assert_eq!(buf.last(), Some(&0));
    assert_eq!(from_wide(&buf), "Hello!");

    let buf = to_wide("привет");
    assert_eq!(from_wide(&buf), "привет");
}

#[test]
fn from_wide_without_terminator() {
    let buf: Vec<u16> = "abcd".encode_utf16().collect();
    assert_eq!(from_wide(&buf), "abcd");
}

#[test]
fn from_wide_stops_at_first_nul() {
    let buf: Vec<u16> = "ab\0cd".encode_utf16().collect();
    assert_eq!(from_wide(&buf), "ab");
}

#[rstest]
#[case(&[""], "\"\"")]
#[case(&["a b"], "\"a b\"")]
#[case(&["he said \"hi\""], "\"he said \\\"hi\\\"\"")]
#[case(&["simple"], "simple")]
#[case(&["tab\there"], "\"tab\there\"")]
#[case(&["back\\slash"], "back\\slash")]
#[case(&["back\\slash quoted"], "\"back\\\\slash quoted\"")]
fn quoting(#[case] args: &[&str], #[case] expected: &str) {
    assert_eq!(quote_args(args), expected);
}

#[test]
fn quoting_joins_with_single_spaces() {
    let line = quote_args(&["cmd", "/c", "echo Hello, world!", ""]);
    assert_eq!(line, "cmd /c \"echo Hello, world!\" \"\"");
}

#[test]
fn environment_block_is_sorted_and_double_terminated() {
    let mut env = HashMap::new();
    env.insert("B".to_string(), "2".to_string());
    env.insert("A".to_string(), "1".to_string());

    let block = environment_block(&env);
    let expected: Vec<u16> = "A=1\0B=2\0\0".encode_utf16().collect();
    assert_eq!(block, expected);
}

#[test]
fn environment_block_of_empty_map_is_a_single_nul() {
    let block = environment_block(&HashMap::new());
    assert_eq!(block, vec![0]);
}

#[test]
fn environment_block_keeps_values_verbatim() {
    let mut env = HashMap::new();
    env.insert("PATH".to_string(), "C:\\bin;C:\\tools".to_string());

    let block = environment_block(&env);
    let expected: Vec<u16> = "PATH=C:\\bin;C:\\tools\0\0".encode_utf16().collect();
    assert_eq!(block, expected);
}
