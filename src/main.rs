use bplib::dtntime::DtnTimeHelpers;
use bplib::helpers::*;
use bplib::*;
use std::env;
use std::io;
use std::io::prelude::*;
use std::process;

fn usage(filepath: &str) {
    println!("usage {:?} <cmd> [args]", filepath);
    println!("\t decode <hexstring|stdin> - prints the custody ids acknowledged by a dacs record");
    println!("\t encode <cid>... - builds dacs records acknowledging the given custody ids");
    println!("\t dtntime [dtntimestamp] - prints current time as dtntimestamp or prints dtntime human readable");
    println!("\t d2u [dtntimestamp] - converts dtntime to unixstimestamp");
    println!("\t attributes [json] - prints the effective channel attributes");
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

fn decode(rec: &[u8]) {
    let mut flags = StatusFlags::empty();
    let mut ranges = RangeTree::new(rangetree_size(rec)).unwrap_or_else(|e| fail(&e.to_string()));
    let result = dacs::decode(rec, &mut flags, |cid| ranges.insert(cid));
    for range in ranges.ranges() {
        println!("{}", range);
    }
    match result {
        Ok(count) => println!("{} custody ids acknowledged", count),
        Err(e) => eprintln!("decoding failed: {}", e),
    }
    if !flags.is_empty() {
        println!("flags: {:?}", flags);
    }
}

/// Each fill takes at least one byte, so the record cannot carry more.
fn rangetree_size(rec: &[u8]) -> u32 {
    (rec.len() as u32).clamp(1, rbtree::MAX_TREE_SIZE)
}

fn decode_from_stdin() {
    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = io::stdin().read_to_end(&mut buf) {
        fail(&format!("Error reading from stdin: {}", e));
    }
    let text = String::from_utf8_lossy(&buf);
    let text = text.trim();
    match unhexify(text) {
        Ok(rec) => decode(&rec),
        Err(_) => decode(&buf),
    }
}

fn encode(cids: &[String]) {
    let attr = Attributes::default();
    let mut tree =
        RangeTree::new(attr.max_gaps_per_dacs).unwrap_or_else(|e| fail(&e.to_string()));
    let mut flags = StatusFlags::empty();
    for cid in cids {
        let cid: CustodyId = cid
            .parse()
            .unwrap_or_else(|_| fail(&format!("invalid custody id: {}", cid)));
        match tree.insert(cid) {
            Ok(()) | Err(Error::Duplicate) => {}
            Err(e) => fail(&format!("cannot add {}: {}", cid, e)),
        }
    }
    let mut rec = vec![0; dacs::record_capacity(attr.max_fills_per_dacs)];
    while !tree.is_empty() {
        let len = dacs::encode(&mut tree, attr.max_fills_per_dacs, &mut rec, &mut flags)
            .unwrap_or_else(|e| fail(&e.to_string()));
        println!("{}", hexify(&rec[..len]));
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() == 1 {
        usage(&args[0]);
        process::exit(1);
    }

    let cmd = &args[1];
    match cmd.as_str() {
        "decode" => {
            if args.len() == 3 {
                let rec = unhexify(&args[2]).unwrap_or_else(|_| fail("invalid hexstring"));
                decode(&rec);
            } else {
                decode_from_stdin();
            }
        }
        "encode" => {
            if args.len() > 2 {
                encode(&args[2..]);
            } else {
                usage(&args[0]);
            }
        }
        "dtntime" => {
            if args.len() == 3 {
                let ts: DtnTime = args[2]
                    .parse::<u64>()
                    .unwrap_or_else(|_| fail("invalid timestamp"));
                println!("{}", ts.string());
            } else {
                match dtn_time_now() {
                    Ok(now) => println!("{}", now),
                    Err(e) => fail(&e.to_string()),
                }
            }
        }
        "d2u" => {
            if args.len() == 3 {
                let ts: DtnTime = args[2]
                    .parse::<u64>()
                    .unwrap_or_else(|_| fail("invalid timestamp"));
                println!("{}", ts.unix());
            } else {
                usage(&args[0]);
            }
        }
        "attributes" => {
            let attr = if args.len() == 3 {
                Attributes::from_json(&args[2]).unwrap_or_else(|e| fail(&e.to_string()))
            } else {
                Attributes::default()
            };
            match attr.to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => fail(&e.to_string()),
            }
        }
        _ => usage(&args[0]),
    }
}
