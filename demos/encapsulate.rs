use std::env;
use std::fs::File;
use std::io::{Read, Write};

use ts_encap::{Encapsulator, PidSet, TsPacket, PACKET_SIZE};

fn main() {
    pretty_env_logger::init();
    let mut args = env::args().skip(1);
    let input_path = args.next().expect("usage: encapsulate <in.ts> <out.ts> <input-pid-hex> <output-pid-hex>");
    let output_path = args.next().expect("missing output path");
    let input_pid = u16::from_str_radix(
        args.next().expect("missing input pid").trim_start_matches("0x"),
        16,
    )
    .expect("invalid input pid");
    let output_pid = u16::from_str_radix(
        args.next().expect("missing output pid").trim_start_matches("0x"),
        16,
    )
    .expect("invalid output pid");

    let mut input = File::open(input_path).expect("unable to open input");
    let mut output = File::create(output_path).expect("unable to create output");

    let mut encap = Encapsulator::new(output_pid, PidSet::from_iter([input_pid]), None);

    loop {
        let mut buf = [0_u8; PACKET_SIZE];
        match input.read_exact(&mut buf) {
            Ok(()) => {}
            Err(_) => break,
        }
        let mut pkt = TsPacket::new(buf);
        if !encap.process_packet(&mut pkt) {
            eprintln!("encapsulator error: {}", encap.last_error());
        }
        output.write_all(pkt.b()).expect("IO error writing output");
    }
}
