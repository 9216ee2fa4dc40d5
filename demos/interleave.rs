extern crate costack;

use costack::{Scheduler, ScheduleStatus};

fn func_a(s: &Scheduler, args: &'static [i32]) {
    for v in args {
        println!("funcA: {}", v);
        s.yield_now();
    }
}

fn func_b(s: &Scheduler, args: &'static [i32]) {
    for v in args {
        println!("funcB: {}", v);
        s.yield_now();
    }
}

static ARGS_A: [i32; 3] = [1, 2, 3];
static ARGS_B: [i32; 3] = [4, 5, 6];

fn main() {
    let s = Scheduler::new();
    let id1 = s.create(func_a, &ARGS_A[..]).expect("create coroutine A");
    let id2 = s.create(func_b, &ARGS_B[..]).expect("create coroutine B");

    let mut rounds = 0;

    println!("start");
    let _ = s.run(id1);
    let _ = s.run(id2);

    while s.status() != ScheduleStatus::Finished {
        let _ = s.resume(id1);
        let _ = s.resume(id2);
        rounds += 1;
    }

    println!("end after {} rounds", rounds);
    s.close();
}
