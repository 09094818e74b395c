use std::{path::PathBuf, thread, time::Duration};

use clap::Parser;
use ocho_base::{
    cpu::{Cpu, CpuError, CpuEvent, InputEvent},
    machine::{Key, KeyState},
    screen::Screen,
};
use pixels::{Pixels, SurfaceTexture};
use rodio::{OutputStream, Sink};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
};

use crate::beeper::Beeper;

mod beeper;

/// RGB color for the pixel on-state
const COLOR_PIXEL_ON: [u8; 3] = [0xFF, 0xFF, 0xFF];
/// RGB color for the pixel off-state
const COLOR_PIXEL_OFF: [u8; 3] = [0x00, 0x00, 0x00];

/// Default window scale relative to the machine framebuffer.
const WINDOW_SCALE: u32 = 12;

/// Frequency of the beep played while the sound timer runs.
const BEEP_FREQUENCY: f32 = 440.0;

#[derive(Debug, Parser)]
#[clap(version, about)]
struct CliOpts {
    /// The path to the file containing the ROM.
    /// The file's contents will be loaded into machine memory,
    /// starting at address 0x200.
    rom_file: PathBuf,
    /// Delay between execution cycles, in milliseconds.
    #[clap(short, long, default_value_t = 5)]
    cycle_interval_ms: u64,
}

/// The canonical 4x4 keypad layout on the left half of a QWERTY keyboard.
fn map_key(keycode: VirtualKeyCode) -> Option<Key> {
    use VirtualKeyCode::*;

    match keycode {
        // row 1
        Key1 => Some(Key::K1),
        Key2 => Some(Key::K2),
        Key3 => Some(Key::K3),
        Key4 => Some(Key::KC),
        // row 2
        Q => Some(Key::K4),
        W => Some(Key::K5),
        E => Some(Key::K6),
        R => Some(Key::KD),
        // row 3
        A => Some(Key::K7),
        S => Some(Key::K8),
        D => Some(Key::K9),
        F => Some(Key::KE),
        // row 4
        Z => Some(Key::KA),
        X => Some(Key::K0),
        C => Some(Key::KB),
        V => Some(Key::KF),
        _ => None,
    }
}

fn map_key_state(state: ElementState) -> KeyState {
    match state {
        ElementState::Pressed => KeyState::Pressed,
        ElementState::Released => KeyState::Released,
    }
}

fn main() -> Result<(), pixels::Error> {
    let cli_opts = CliOpts::parse();

    tracing_subscriber::fmt()
        .pretty()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let rom = std::fs::read(&cli_opts.rom_file).expect("could not read the ROM file");
    let cpu = Cpu::builder()
        .rom(&rom)
        .expect("the ROM does not fit into machine memory")
        .cycle_interval(Duration::from_millis(cli_opts.cycle_interval_ms))
        .build();

    let event_loop = EventLoop::<CpuEvent>::with_user_event();
    let window = create_window(&event_loop);

    let window_size = window.inner_size();
    let surface_texture = SurfaceTexture::new(window_size.width, window_size.height, &window);
    let mut pixels = Pixels::new(Screen::WIDTH as u32, Screen::HEIGHT as u32, surface_texture)?;

    let (_stream, stream_handle) =
        OutputStream::try_default().expect("could not open an audio output stream");
    let sink = Sink::try_new(&stream_handle).expect("could not create an audio sink");
    sink.set_volume(0.5);
    sink.pause();
    sink.append(Beeper::new(BEEP_FREQUENCY));

    let mut screen = *cpu.screen();
    let (input_sender, cpu_event_receiver, cpu_join_handle) = cpu.start();

    let mut input_sender = Some(input_sender);
    let mut cpu_join_handle = Some(cpu_join_handle);

    // Forward interpreter events into the winit event loop.
    let event_loop_proxy = event_loop.create_proxy();
    thread::Builder::new()
        .name("event forwarder".to_owned())
        .spawn(move || loop {
            let event = match cpu_event_receiver.recv() {
                Ok(event) => event,
                Err(_) => break, // interpreter stopped
            };
            if event_loop_proxy.send_event(event).is_err() {
                break; // event loop closed
            }
        })
        .expect("could not spawn event forwarder thread");

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::Resized(size) => pixels.resize_surface(size.width, size.height),
                WindowEvent::CloseRequested => {
                    shut_down(&mut input_sender, &mut cpu_join_handle, &sink);
                    *control_flow = ControlFlow::Exit;
                }
                WindowEvent::KeyboardInput {
                    input:
                        winit::event::KeyboardInput {
                            state,
                            virtual_keycode: Some(virtual_keycode),
                            ..
                        },
                    ..
                } => {
                    if virtual_keycode == VirtualKeyCode::Escape && state == ElementState::Pressed {
                        info!("escape pressed, exiting");
                        shut_down(&mut input_sender, &mut cpu_join_handle, &sink);
                        *control_flow = ControlFlow::Exit;
                    } else if let Some(key) = map_key(virtual_keycode) {
                        debug!(?key, ?state, "key state changed");
                        if let Some(sender) = input_sender.as_ref() {
                            // A failed send means the interpreter halted;
                            // the Halted event closes the window.
                            let _ = sender.send(InputEvent::KeyStateChange {
                                key,
                                state: map_key_state(state),
                            });
                        }
                    }
                }
                _ => (),
            },
            Event::UserEvent(CpuEvent::ScreenUpdated { screen: new_screen }) => {
                screen = new_screen;
                window.request_redraw();
            }
            Event::UserEvent(CpuEvent::WaitingForKeyPress) => {
                debug!("interpreter is waiting for a key press")
            }
            Event::UserEvent(CpuEvent::SoundStarted) => sink.play(),
            Event::UserEvent(CpuEvent::SoundStopped) => sink.pause(),
            Event::UserEvent(CpuEvent::Halted { error }) => {
                error!(%error, "interpreter halted");
                shut_down(&mut input_sender, &mut cpu_join_handle, &sink);
                *control_flow = ControlFlow::Exit;
            }
            Event::RedrawRequested(_) => {
                draw_screen(&screen, pixels.get_frame());
                if let Err(error) = pixels.render() {
                    error!(?error, "could not render the frame");
                    *control_flow = ControlFlow::Exit;
                }
            }
            _ => (),
        }
    });
}

fn create_window(event_loop: &EventLoop<CpuEvent>) -> winit::window::Window {
    let size = LogicalSize::new(
        (Screen::WIDTH as u32 * WINDOW_SCALE) as f64,
        (Screen::HEIGHT as u32 * WINDOW_SCALE) as f64,
    );

    winit::window::WindowBuilder::new()
        .with_title("ocho")
        .with_inner_size(size)
        .with_min_inner_size(LogicalSize::new(Screen::WIDTH as f64, Screen::HEIGHT as f64))
        .build(event_loop)
        .expect("could not create the window")
}

/// Paint a framebuffer snapshot into an RGBA frame.
fn draw_screen(screen: &Screen, frame: &mut [u8]) {
    for (frame_pixel, pixel_on) in frame.chunks_exact_mut(4).zip(screen.iter()) {
        frame_pixel[0..3].copy_from_slice(if pixel_on {
            &COLOR_PIXEL_ON
        } else {
            &COLOR_PIXEL_OFF
        });
        frame_pixel[3] = 0xFF; // alpha
    }
}

fn shut_down(
    input_sender: &mut Option<flume::Sender<InputEvent>>,
    cpu_join_handle: &mut Option<thread::JoinHandle<Result<(), CpuError>>>,
    sink: &Sink,
) {
    // Dropping the sender stops the interpreter, key wait included.
    drop(input_sender.take());
    sink.stop();
    if let Some(join_handle) = cpu_join_handle.take() {
        match join_handle.join().expect("interpreter thread panicked") {
            Ok(()) => (),
            Err(error) => warn!(%error, "interpreter stopped with an error"),
        }
    }
}
