//! Vending machine example
//!
//! A console vending machine with three states:
//! - Idle: waiting for the first coin, printing a heartbeat every few seconds
//! - Collect: accumulating credit until a selection is made or the customer walks away
//! - Exit: terminal state
//!
//! The example shows:
//! - Guarded transitions (coin validation, sufficient credit)
//! - An internal transition (the Idle heartbeat does not re-enter Idle)
//! - A one-shot timeout that refunds the credit and a periodic pulse timer
//! - Timers started and stopped from entry/exit hooks and actions
//! - PlantUML diagram export (debug builds only)
//!
//! Run with `RUST_LOG=clocked_fsm=debug` to trace timer activity.

use std::io::{self, BufRead, Write};

use clocked_fsm::prelude::*;
use clocked_fsm::Injector;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VendState {
    Idle,
    Collect,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VendEvent {
    ExitNow,
    Select(usize),
    Coin(u32),
    Timeout,
    Pulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VendKind {
    ExitNow,
    Select,
    Coin,
    Timeout,
    Pulse,
}

impl Event for VendEvent {
    type Kind = VendKind;

    fn kind(&self) -> VendKind {
        match self {
            VendEvent::ExitNow => VendKind::ExitNow,
            VendEvent::Select(_) => VendKind::Select,
            VendEvent::Coin(_) => VendKind::Coin,
            VendEvent::Timeout => VendKind::Timeout,
            VendEvent::Pulse => VendKind::Pulse,
        }
    }
}

struct Item {
    name: &'static str,
    price: u32,
}

const ITEMS: [Item; 6] = [
    Item { name: "Cheeze Puffs", price: 65 },
    Item { name: "Chocolate Bar", price: 60 },
    Item { name: "Corn Chips", price: 80 },
    Item { name: "Popcorn", price: 90 },
    Item { name: "Potato Chips", price: 80 },
    Item { name: "Pretzels", price: 60 },
];

const COLLECT_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_PULSE: Duration = Duration::from_secs(3);

struct VendingContext {
    credit: u32,
    exit: bool,
    timeout: Timer<VendEvent>,
    pulse: Timer<VendEvent>,
}

impl VendingContext {
    fn good_coin(&self, event: &VendEvent) -> bool {
        match event {
            VendEvent::Coin(5 | 10 | 25 | 50) => true,
            VendEvent::Coin(1) => {
                eprintln!("No pennies, please.");
                false
            }
            _ => {
                eprintln!("No foreign coins!");
                false
            }
        }
    }

    fn good_select(&self, event: &VendEvent) -> bool {
        let VendEvent::Select(n) = event else {
            return false;
        };
        match ITEMS.get(*n) {
            None => {
                eprintln!("Invalid selection");
                false
            }
            Some(item) if self.credit < item.price => {
                eprintln!("Please deposit another {} cents.", item.price - self.credit);
                false
            }
            Some(_) => true,
        }
    }

    fn collect(&mut self, event: &VendEvent) {
        if let VendEvent::Coin(cents) = event {
            self.credit += cents;
            println!("Credit: {} cents", self.credit);
            self.timeout.start(COLLECT_TIMEOUT, TimerMode::Once);
        }
    }

    fn vend(&mut self, event: &VendEvent) {
        if let VendEvent::Select(n) = event {
            let item = &ITEMS[*n];
            println!("Enjoy your {}.", item.name);
            let change = self.credit - item.price;
            if change > 0 {
                println!("Change: {} cents.", change);
            }
        }
    }

    fn refund(&mut self) {
        println!("Timeout.");
        if self.credit > 0 {
            println!("Get back your money of: {} cents.", self.credit);
        }
        self.credit = 0;
    }
}

fn print_menu() {
    println!("\nVending Machine:\n---------------");
    for (i, item) in ITEMS.iter().enumerate() {
        println!("{}. {} ({})", selection_letter(i), item.name, item.price);
    }
}

fn selection_letter(index: usize) -> char {
    char::from(b'A' + index as u8)
}

type VendingMachine = StateMachine<VendState, VendEvent, VendingContext>;

fn build(injector: &Injector<VendEvent>) -> Result<VendingMachine, Error<VendState>> {
    let context = VendingContext {
        credit: 0,
        exit: false,
        timeout: injector.timer(|| VendEvent::Timeout),
        pulse: injector.timer(|| VendEvent::Pulse),
    };

    StateMachineBuilder::new(context)
        .initial(VendState::Idle)
        .state(
            VendState::Idle,
            State::new()
                .on_entry(|_, ctx: &mut VendingContext| {
                    println!("entering: Idle");
                    print_menu();
                    ctx.credit = 0;
                    ctx.timeout.stop();
                    ctx.pulse.start(IDLE_PULSE, TimerMode::Pulse);
                })
                .on_exit(|_, ctx: &mut VendingContext| {
                    println!("leaving: Idle");
                    ctx.pulse.stop();
                }),
        )
        .state(
            VendState::Collect,
            State::new()
                .on_entry(|_, _: &mut VendingContext| println!("entering: Collect"))
                .on_exit(|_, ctx: &mut VendingContext| {
                    println!("leaving: Collect");
                    ctx.timeout.stop();
                }),
        )
        .state(
            VendState::Exit,
            State::new()
                .on_entry(|_, ctx: &mut VendingContext| {
                    println!("entering: Exit");
                    ctx.exit = true;
                })
                .on_exit(|_, _: &mut VendingContext| println!("leaving: Exit")),
        )
        .rule(VendState::Idle, VendKind::ExitNow, Rule::to(VendState::Exit))
        .rule(
            VendState::Idle,
            VendKind::Coin,
            Rule::to(VendState::Collect)
                .guard(VendingContext::good_coin)
                .action(VendingContext::collect),
        )
        .rule(
            VendState::Idle,
            VendKind::Pulse,
            Rule::internal().action(|_: &mut VendingContext, _| println!("pulse")),
        )
        .rule(VendState::Collect, VendKind::ExitNow, Rule::to(VendState::Exit))
        .rule(
            VendState::Collect,
            VendKind::Select,
            Rule::to(VendState::Idle)
                .guard(VendingContext::good_select)
                .action(VendingContext::vend),
        )
        .rule(
            VendState::Collect,
            VendKind::Coin,
            Rule::to(VendState::Collect)
                .guard(VendingContext::good_coin)
                .action(VendingContext::collect),
        )
        .rule(
            VendState::Collect,
            VendKind::Timeout,
            Rule::to(VendState::Idle).action(|ctx: &mut VendingContext, _| ctx.refund()),
        )
        .no_transition(|state, event, _| {
            println!("no transition from state {:?} on event {:?}", state, event)
        })
        .build()
}

fn parse(line: &str) -> Option<VendEvent> {
    let first = line.trim().chars().next()?;
    if first.is_ascii_digit() {
        let digits: String = line.trim().chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok().map(VendEvent::Coin)
    } else if first == 'x' {
        Some(VendEvent::ExitNow)
    } else if first.is_ascii_alphabetic() {
        let index = first.to_ascii_uppercase() as usize - 'A' as usize;
        Some(VendEvent::Select(index))
    } else {
        None
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let machine = Dispatcher::with_config(
        DispatcherConfig::default().thread_name("vending-clock"),
        build,
    )?;

    // Export PlantUML diagram (only available in debug builds with plantuml feature)
    #[cfg(all(debug_assertions, feature = "plantuml"))]
    {
        let diagram = machine.with_machine(|m| m.export_plantuml());
        std::fs::write("vending_machine.puml", diagram)?;
        println!("📊 PlantUML diagram exported to vending_machine.puml");
    }

    machine.start()?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    while !machine.with_machine(|m| m.context().exit) {
        print!(
            "\nEnter coins (5,10,25,50) or selection (A-{}) or x to exit: ",
            selection_letter(ITEMS.len() - 1)
        );
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        match parse(&line?) {
            Some(event) => {
                machine.inject(event)?;
            }
            None => eprintln!("Invalid input"),
        }
    }

    machine.stop()?;
    Ok(())
}
