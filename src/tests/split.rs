//! Split-invariance: the emitted event sequence depends only on the input
//! bytes, never on how they are chunked across `feed` calls.

use alloc::vec::Vec;

use quickcheck::QuickCheck;

use crate::options::ParserOptions;
use crate::parser::StreamingParser;
use crate::tests::fixtures::{decode, everything, merge_chunks, Event, RecordingSink};

/// Documents covering scalars, strings with escapes, maps, nested
/// messages, well-known types, and heavy whitespace.
const CORPUS: &[&str] = &[
    r#"{"i":-2147483648,"l":"9223372036854775807","u":4294967295,"d":1.5e3,"b":true}"#,
    r#"{"s":"héllo 😀 \n\"x\"","by":"dGVzdA==","e":"GREEN"}"#,
    r#"{"sub":{"i":1,"sub":{"s":"deep"}},"ri":[1,2,3],"rs":["a","","b"]}"#,
    r#"{"mi":{"1":"a","2":"b"},"ms":{"k":7},"mb":{"true":"t"}}"#,
    r#"{"ts":"2017-01-02T03:04:05.6Z","dur":"-1.5s","w":42,"sw":"wrapped"}"#,
    r#"{"v":{"k":[1,"two",true,null]},"st":{"a":1},"lv":[1,2]}"#,
    "  { \"i\" : 0 ,\n\t\"rs\" : [ ] , \"fooBar\" : \"j\" }  ",
    r#"{"d":Infinity,"fl":-Infinity,"ul":18446744073709551615}"#,
];

fn decode_in_chunks(json: &str, splits: &[usize]) -> Vec<Event> {
    let msg = everything();
    let mut parser = StreamingParser::new(msg, RecordingSink::default(), ParserOptions::default());
    let bytes = json.as_bytes();
    let mut idx = 0;
    let mut remaining = bytes.len();
    for &s in splits {
        if remaining == 0 {
            break;
        }
        let size = 1 + (s % remaining);
        parser.feed(&bytes[idx..idx + size]);
        idx += size;
        remaining -= size;
    }
    if remaining > 0 {
        parser.feed(&bytes[idx..]);
    }
    assert!(parser.status().is_none(), "status: {:?}", parser.status());
    parser.end().unwrap();
    parser.into_sink().events
}

#[test]
fn partition_invariance_quickcheck() {
    fn prop(doc: usize, splits: Vec<usize>) -> bool {
        let json = CORPUS[doc % CORPUS.len()];
        let expected = merge_chunks(&decode(everything(), json).unwrap());
        let got = merge_chunks(&decode_in_chunks(json, &splits));
        got == expected
    }

    QuickCheck::new()
        .tests(500)
        .quickcheck(prop as fn(usize, Vec<usize>) -> bool);
}

#[test]
fn split_at_every_byte() {
    for json in CORPUS {
        let expected = merge_chunks(&decode(everything(), json).unwrap());
        for at in 1..json.len() {
            let msg = everything();
            let mut parser =
                StreamingParser::new(msg, RecordingSink::default(), ParserOptions::default());
            parser.feed(&json.as_bytes()[..at]);
            parser.feed(&json.as_bytes()[at..]);
            assert!(
                parser.status().is_none(),
                "split at {at} of {json:?}: {:?}",
                parser.status()
            );
            parser.end().unwrap();
            let got = merge_chunks(&parser.into_sink().events);
            assert_eq!(got, expected, "split at {at} of {json:?}");
        }
    }
}

#[test]
fn byte_at_a_time() {
    for json in CORPUS {
        let expected = merge_chunks(&decode(everything(), json).unwrap());
        let msg = everything();
        let mut parser =
            StreamingParser::new(msg, RecordingSink::default(), ParserOptions::default());
        for b in json.as_bytes() {
            parser.feed(core::slice::from_ref(b));
        }
        assert!(parser.status().is_none(), "status: {:?}", parser.status());
        parser.end().unwrap();
        let got = merge_chunks(&parser.into_sink().events);
        assert_eq!(got, expected, "byte-at-a-time of {json:?}");
    }
}
