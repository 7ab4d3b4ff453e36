use std::env;
use std::error::Error;
use std::fs;

use getopts::Options;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use gcn_cu_timing::alu::{NullAlu, StridedPreparer};
use gcn_cu_timing::buffer::{set_u32, set_u64};
use gcn_cu_timing::compute_unit::ComputeUnit;
use gcn_cu_timing::config::CuConfig;
use gcn_cu_timing::context::Capabilities;
use gcn_cu_timing::decoder::FormatDecoder;
use gcn_cu_timing::event::Cycle;
use gcn_cu_timing::fixed_memory::FixedLatencyMemory;
use gcn_cu_timing::kernel::{decode_kernel_desc, KernelInfo, WorkGroupDesc, KERNEL_DESCRIPTOR_SIZE};
use gcn_cu_timing::protocol::{DispatcherMsg, MapWgReq, Pid, ReqId};

const DESCRIPTOR_ADDRESS: u64 = 0x0;
const CODE_OFFSET: u64 = 0x100;
const DATA_ADDRESS: u64 = 0x10000;
const MAX_CYCLES: Cycle = 100_000_000;

/// Loads a dword pair from the kernel arguments, streams one dword per
/// work-item through the vector memory path with a barrier in between,
/// and writes the result back.
const PROGRAM: [u32; 15] = [
    0xC006_0100, 0x0000_0000, // s_load_dwordx2 s[4:5], s[0:1], 0x0
    0xBF8C_0070, // s_waitcnt lgkmcnt(0)
    0xDC50_0000, 0x0300_0001, // flat_load_dword v3, v[1:2]
    0xBF8C_0070, // s_waitcnt vmcnt(0)
    0x0206_0703, // v_add_f32 v3, v3, v3
    0xD81A_0000, 0x0000_0300, // ds_write_b32 v0, v3
    0xBF8A_0000, // s_barrier
    0x0206_0703, // v_add_f32 v3, v3, v3
    0xDC70_0000, 0x0000_0301, // flat_store_dword v[1:2], v3
    0xBF8C_0070, // s_waitcnt vmcnt(0)
    0xBF81_0000, // s_endpgm
];

fn kernel_image() -> Vec<u8> {
    let mut image = vec![0u8; CODE_OFFSET as usize + PROGRAM.len() * 4];
    set_u32(&mut image, 0, 1024);
    set_u32(&mut image, 8, 256);
    set_u64(&mut image, 16, CODE_OFFSET);
    // 8 VGPRs, 16 SGPRs
    set_u32(&mut image, 48, 1 | (1 << 6));
    for (i, &word) in PROGRAM.iter().enumerate() {
        set_u32(&mut image, CODE_OFFSET as usize + i * 4, word);
    }
    image
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn parse_or<T: std::str::FromStr>(
    matches: &getopts::Matches,
    name: &str,
    default: T,
) -> Result<T, Box<dyn Error>> {
    match matches.opt_str(name) {
        Some(value) => value
            .parse()
            .map_err(|_| format!("invalid value for --{}: {}", name, value).into()),
        None => Ok(default),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "cu-sim".to_string());

    let mut opts = Options::new();
    opts.optopt("c", "config", "compute unit configuration (YAML)", "FILE");
    opts.optopt("n", "work-groups", "number of work-groups to run", "N");
    opts.optopt("w", "wavefronts", "wavefronts per work-group", "N");
    opts.optopt("l", "latency", "memory latency in cycles", "CYCLES");
    opts.optflag("h", "help", "print this help");
    let matches = opts.parse(args.iter().skip(1))?;
    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return Ok(());
    }

    let config = match matches.opt_str("c") {
        Some(path) => CuConfig::from_yaml_str(&fs::read_to_string(path)?)?,
        None => CuConfig::default(),
    };
    let num_wgs: usize = parse_or(&matches, "work-groups", 16)?;
    let wavefronts: usize = parse_or(&matches, "wavefronts", 4)?;
    let latency: Cycle = parse_or(&matches, "latency", 100)?;

    let image = kernel_image();
    let kd = decode_kernel_desc(&image[..KERNEL_DESCRIPTOR_SIZE]);
    let kernel = KernelInfo::from_descriptor(&kd, DESCRIPTOR_ADDRESS);
    let work_items = wavefronts * config.wavefront_size;
    if work_items > kd.max_flat_workgroup_size {
        return Err(format!(
            "{} work-items per work-group exceed the kernel's limit of {}",
            work_items, kd.max_flat_workgroup_size
        )
        .into());
    }

    let caps = Capabilities {
        decoder: Box::new(FormatDecoder::new()),
        alu: Box::new(NullAlu),
        preparer: Box::new(StridedPreparer {
            base: DATA_ADDRESS,
            stride: 4,
            wavefront_size: config.wavefront_size,
        }),
    };
    let mut cu = ComputeUnit::new("cu0", config, caps)?;

    let data_size = DATA_ADDRESS as usize + num_wgs * work_items * 4;
    let mut inst_mem = FixedLatencyMemory::new(image.len(), latency);
    inst_mem.load(0, &image);
    let mut scalar_mem = FixedLatencyMemory::new(data_size, latency);
    let mut vector_mem = FixedLatencyMemory::new(data_size, latency);

    let pb = ProgressBar::new(num_wgs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} work-groups {msg}"),
    );

    let mut next_wg = 0;
    let mut next_req: ReqId = 0;
    let mut mapping: Option<ReqId> = None;
    let mut finished = 0;
    let mut now: Cycle = 0;

    while finished < num_wgs {
        if now >= MAX_CYCLES {
            return Err(format!("no completion after {} cycles", MAX_CYCLES).into());
        }

        if mapping.is_none() && next_wg < num_wgs && cu.dispatcher.from_dispatcher.can_send() {
            next_req += 1;
            let req = MapWgReq {
                id: next_req,
                work_group: WorkGroupDesc::new(
                    [next_wg as u32, 0, 0],
                    kernel.clone(),
                    work_items,
                    cu.config().wavefront_size,
                ),
                pid: Pid(1),
            };
            if cu.dispatcher.from_dispatcher.send(req).is_ok() {
                mapping = Some(next_req);
            }
        }

        cu.tick(now)?;
        inst_mem.tick(&mut cu.ctx.inst_mem, now);
        scalar_mem.tick(&mut cu.ctx.scalar_mem, now);
        vector_mem.tick(&mut cu.ctx.vector_mem, now);

        while let Some(msg) = cu.dispatcher.to_dispatcher.retrieve() {
            match msg {
                DispatcherMsg::MapWgRsp(rsp) => {
                    if Some(rsp.respond_to) == mapping {
                        mapping = None;
                        if rsp.ok {
                            next_wg += 1;
                        }
                    }
                }
                DispatcherMsg::WgFinish(_) => {
                    finished += 1;
                    pb.inc(1);
                }
            }
        }
        now += 1;
    }
    pb.finish_with_message("done");

    info!("{} finished {} work-groups in {} cycles", cu.name(), finished, now);
    println!("cycles:            {}", now);
    println!("work-groups:       {}", finished);
    println!("wavefronts:        {}", finished * wavefronts);
    println!(
        "cycles/work-group: {:.1}",
        now as f64 / finished.max(1) as f64
    );
    if let Some(last) = cu.completion_log().last() {
        println!("last work-group:   {:?} at cycle {}", last.work_group, last.cycle);
    }
    Ok(())
}
