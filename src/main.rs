use anyhow::{Context, Result};
use log::debug;
use sdr_check::console;
use sdr_check::{CommandError, FrameBuffer, Simulator};
use std::io::{self, BufRead, Read, Write};
use std::time::Duration;

// The main entry point for the CAT firmware simulator.
fn main() -> Result<()> {
    console::init_logging();

    println!("==============================");
    println!("  SDR Controller CAT Simulator  ");
    println!("==============================");

    let mut simulator = Simulator::new();
    println!("Simulator started at {} Hz", simulator.frequency_hz);

    // Main menu loop.
    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Listen on Serial Port");
        println!("  3. Exit");
        let choice = prompt("> ")?;

        match choice.trim() {
            "1" => run_manual_mode(&mut simulator)?,
            "2" => run_serial_mode(&mut simulator)?,
            "3" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1, 2, or 3."),
        }
    }
    Ok(())
}

// Prints a prompt and reads one line from stdin.
fn prompt(text: &str) -> Result<String> {
    print!("{}", text);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input)
}

// Handles the manual command input mode.
fn run_manual_mode(simulator: &mut Simulator) -> Result<()> {
    println!("\n--- Manual Mode ---");
    println!("Enter CAT frames (e.g. FA014074000; or IF;), or a front-panel action:");
    println!("  up, down, step, tx, state. Type 'back' to return to the main menu.");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        match command {
            "back" => break,
            "" => {}
            "up" => simulator.step_up(),
            "down" => simulator.step_down(),
            "step" => {
                simulator.cycle_step_size();
                println!("Step size: {} Hz", simulator.step_size());
            }
            "tx" => simulator.toggle_tx(),
            "state" => print_state(simulator),
            _ => {
                process_and_display_command(simulator, command);
            }
        }
        print!("> ");
        io::stdout().flush()?;
    }
    Ok(())
}

fn print_state(simulator: &Simulator) {
    println!(
        "Frequency: {} Hz | Step: {} Hz | TX: {} | AI: {} | ST: {}",
        simulator.frequency_hz,
        simulator.step_size(),
        u8::from(simulator.transmitting),
        u8::from(simulator.auto_info),
        u8::from(simulator.split)
    );
}

// Handles the serial port listening mode.
fn run_serial_mode(simulator: &mut Simulator) -> Result<()> {
    println!("\n--- Serial Mode ---");

    // List available serial ports.
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {}", e);
            return Ok(());
        }
    };

    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(());
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }

    // Get user's choice of serial port.
    let port_choice = prompt("Select a port (number): ")?;
    let port_index: usize = match port_choice.trim().parse() {
        Ok(i) if i < ports.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return Ok(());
        }
    };
    let port_name = &ports[port_index].port_name;

    // Get user's choice of baud rate. The board's UART runs at 9600.
    let baud_rates = [9600, 19200, 38400, 57600, 115200];
    println!("Available baud rates:");
    for (i, &rate) in baud_rates.iter().enumerate() {
        println!("  {}: {}", i, rate);
    }
    let baud_choice = prompt("Select a baud rate (number): ")?;
    let baud_index: usize = match baud_choice.trim().parse() {
        Ok(i) if i < baud_rates.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid baud rate selection.");
            return Ok(());
        }
    };
    let baud_rate = baud_rates[baud_index];

    // Open the selected serial port.
    let mut port = match serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
    {
        Ok(port) => port,
        Err(e) => {
            eprintln!("[ERROR] Failed to open port '{}': {}", port_name, e);
            return Ok(());
        }
    };

    println!(
        "\nListening on {} at {} baud. Press Ctrl+C to exit.",
        port_name, baud_rate
    );

    let mut frames = FrameBuffer::new();
    let mut serial_buf: Vec<u8> = vec![0; 128];
    loop {
        match port.read(serial_buf.as_mut_slice()) {
            Ok(bytes_read) => {
                for &byte in &serial_buf[..bytes_read] {
                    let Some(frame) = frames.push(byte) else {
                        continue;
                    };
                    // Terminals tend to add CR/LF between frames.
                    let frame = frame.trim();
                    println!("> Received: {};", frame);
                    if let Some(res) = process_and_display_frame(simulator, frame) {
                        port.write_all(res.as_bytes())
                            .context("Failed to write to serial port")?;
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
            Err(e) => eprintln!("[ERROR] Serial port error: {}", e),
        }
    }
}

// Processes a typed command string and prints the output.
fn process_and_display_command(simulator: &mut Simulator, command: &str) -> Option<String> {
    display(simulator.process_command(command))
}

// Processes one received frame and prints the output.
fn process_and_display_frame(simulator: &mut Simulator, frame: &str) -> Option<String> {
    display(simulator.process_frame(frame))
}

fn display(result: std::result::Result<Option<String>, CommandError>) -> Option<String> {
    match result {
        Ok(Some(response)) => {
            println!("< {}", response);
            Some(response)
        }
        Ok(None) => {
            debug!("frame accepted, no response");
            None
        }
        Err(e) => {
            // The board stays silent; only the console hears about it.
            eprintln!("[IGNORED] {}", e);
            None
        }
    }
}
