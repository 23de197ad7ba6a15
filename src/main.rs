use anyhow::Context as _;
use keysynth::adapter::GainParam;
use keysynth::command::{OscIndex, WAVE_FM};
use keysynth::config::SynthConfig;
use keysynth::control::ControlChannel;
use keysynth::controllers::KeyboardController;
use keysynth::output::AudioOutput;
use keysynth::params::{LfoDestination, ParamPanel};
use keysynth::port;
use keysynth::telemetry::TelemetryMonitor;
use macroquad::{prelude::*, text::measure_text};
use tokio::runtime::Runtime;

const SCREEN_WIDTH: f32 = 1280.0;
const SCREEN_HEIGHT: f32 = 720.0;
const PANEL_HEIGHT: f32 = 360.0;
const KEY_FONT_SIZE: u16 = 35;
const KNOB_SIZE: f32 = 56.0;
const KNOB_ROW_HEIGHT: f32 = 92.0;
const DETUNE_RANGE: f32 = 12.0;
const FILTER_MIN_HZ: f32 = 20.0;
const FILTER_MAX_HZ: f32 = 12_000.0;
const MAX_ENV_SEC: f32 = 4.0;
const MAX_LFO_HZ: f32 = 20.0;
const MAX_FM_INDEX: f32 = 10.0;
const MAX_FILTER_AMOUNT: f32 = 8_000.0;
const MAX_KNOB_GAIN: f32 = 2.0;
const WAVE_NAMES: [&str; 5] = ["SINE", "SAW", "SQUARE", "TRI", "FM"];

const AMBER: Color = Color {
    r: 0.98,
    g: 0.66,
    b: 0.12,
    a: 1.0,
};
const AMBER_DIM: Color = Color {
    r: 0.78,
    g: 0.52,
    b: 0.08,
    a: 0.4,
};
const BACKGROUND: Color = Color {
    r: 0.02,
    g: 0.02,
    b: 0.02,
    a: 1.0,
};

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        log::error!("{err:#}");
        eprintln!("keysynth: {err:#}");
    }
}

async fn run() -> anyhow::Result<()> {
    let config = SynthConfig::load();
    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let (commands, telemetry, render_port) = port::link(config.link.capacity);
    let output = AudioOutput::start(&config, render_port, runtime.handle())?;

    let keyboard = KeyboardController::new(config.keyboard.mode)
        .with_velocity(config.keyboard.velocity)
        .with_octave(config.keyboard.octave);
    let mut channel = ControlChannel::new(keyboard, ParamPanel::new(config.voices()), commands);
    let mut monitor = TelemetryMonitor::new(telemetry);
    let mut knobs = KnobBoard::new(&config);
    knobs.apply_all(channel.panel_mut(), output.gain());
    let mut knob_drag = KnobDragState::default();
    let mut host_error: Option<String> = None;

    loop {
        let layout = compute_panel_layout();
        let keyboard_layout = build_keyboard_layout(channel.keyboard());
        let mouse_pos = mouse_position_vec();
        let hovered = if knob_drag.active_knob.is_some() {
            None
        } else {
            keyboard_layout.hit_test(mouse_pos)
        };

        let played = runtime
            .block_on(channel.handle_mouse_keys(
                hovered,
                is_mouse_button_pressed(MouseButton::Left),
                is_mouse_button_down(MouseButton::Left),
                is_mouse_button_released(MouseButton::Left),
                &output,
            ))
            .and_then(|_| runtime.block_on(channel.poll_keys(&output)));
        match played {
            Ok(sent) if sent > 0 => host_error = None,
            Ok(_) => {}
            Err(err) => {
                log::warn!(target: "control", "{err:#}");
                host_error = Some(format!("{err:#}"));
            }
        }

        channel.observe(monitor.poll());

        draw_scene(&mut knobs, &mut knob_drag, &layout, &keyboard_layout, &channel, &monitor);
        for id in knobs.take_changed() {
            knobs.apply(id, channel.panel_mut(), output.gain());
        }
        if let Some(message) = &host_error {
            draw_status_line(message, 1);
        }

        if let Err(err) = channel.tick() {
            log::warn!(target: "control", "parameter update failed: {err:#}");
        }

        next_frame().await;
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "keysynth".into(),
        fullscreen: false,
        sample_count: 1,
        window_width: SCREEN_WIDTH as i32,
        window_height: SCREEN_HEIGHT as i32,
        high_dpi: false,
        ..Default::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KnobId {
    Osc1Wave,
    Osc1Detune,
    Osc1Gain,
    Osc1Fm,
    Osc2Wave,
    Osc2Detune,
    Osc2Gain,
    Osc2Fm,
    Wave,
    Cutoff,
    Resonance,
    FilterAmount,
    FilterAttack,
    FilterDecay,
    FilterSustain,
    FilterRelease,
    LfoRate,
    LfoAmount,
    LfoDest,
    Attack,
    Decay,
    Sustain,
    Release,
    Volume,
    Gain,
    Voices,
}

const KNOB_COUNT: usize = 26;

impl KnobId {
    fn label(self) -> &'static str {
        match self {
            KnobId::Osc1Wave | KnobId::Osc2Wave => "WAVE",
            KnobId::Osc1Detune | KnobId::Osc2Detune => "DETUNE",
            KnobId::Osc1Gain | KnobId::Osc2Gain => "LEVEL",
            KnobId::Osc1Fm | KnobId::Osc2Fm => "FM INDEX",
            KnobId::Wave => "BOTH",
            KnobId::Cutoff => "CUTOFF",
            KnobId::Resonance => "EMPHASIS",
            KnobId::FilterAmount => "CONTOUR",
            KnobId::FilterAttack | KnobId::Attack => "ATTACK",
            KnobId::FilterDecay | KnobId::Decay => "DECAY",
            KnobId::FilterSustain | KnobId::Sustain => "SUSTAIN",
            KnobId::FilterRelease | KnobId::Release => "RELEASE",
            KnobId::LfoRate => "RATE",
            KnobId::LfoAmount => "AMOUNT",
            KnobId::LfoDest => "DEST",
            KnobId::Volume => "VOLUME",
            KnobId::Gain => "GAIN",
            KnobId::Voices => "VOICES",
        }
    }

    fn osc(self) -> OscIndex {
        match self {
            KnobId::Osc2Wave | KnobId::Osc2Detune | KnobId::Osc2Gain | KnobId::Osc2Fm => {
                OscIndex::Osc2
            }
            _ => OscIndex::Osc1,
        }
    }
}

struct Section {
    label: &'static str,
    columns: usize,
    knobs: &'static [(KnobId, usize, usize)],
}

const SECTIONS: [Section; 5] = [
    Section {
        label: "OSCILLATORS",
        columns: 4,
        knobs: &[
            (KnobId::Osc1Wave, 0, 0),
            (KnobId::Osc1Detune, 1, 0),
            (KnobId::Osc1Gain, 2, 0),
            (KnobId::Osc1Fm, 3, 0),
            (KnobId::Osc2Wave, 0, 1),
            (KnobId::Osc2Detune, 1, 1),
            (KnobId::Osc2Gain, 2, 1),
            (KnobId::Osc2Fm, 3, 1),
            (KnobId::Wave, 0, 2),
        ],
    },
    Section {
        label: "FILTER",
        columns: 4,
        knobs: &[
            (KnobId::Cutoff, 0, 0),
            (KnobId::Resonance, 1, 0),
            (KnobId::FilterAmount, 2, 0),
            (KnobId::FilterAttack, 0, 1),
            (KnobId::FilterDecay, 1, 1),
            (KnobId::FilterSustain, 2, 1),
            (KnobId::FilterRelease, 3, 1),
        ],
    },
    Section {
        label: "LFO",
        columns: 1,
        knobs: &[
            (KnobId::LfoRate, 0, 0),
            (KnobId::LfoAmount, 0, 1),
            (KnobId::LfoDest, 0, 2),
        ],
    },
    Section {
        label: "LOUDNESS",
        columns: 2,
        knobs: &[
            (KnobId::Attack, 0, 0),
            (KnobId::Decay, 1, 0),
            (KnobId::Sustain, 0, 1),
            (KnobId::Release, 1, 1),
        ],
    },
    Section {
        label: "OUTPUT",
        columns: 1,
        knobs: &[
            (KnobId::Volume, 0, 0),
            (KnobId::Gain, 0, 1),
            (KnobId::Voices, 0, 2),
        ],
    },
];

struct PanelLayout {
    sections: Vec<(Rect, &'static str)>,
    knobs: Vec<(KnobId, Rect)>,
}

fn compute_panel_layout() -> PanelLayout {
    let margin = 36.0;
    let gap = 18.0;
    let usable_width = SCREEN_WIDTH - margin * 2.0 - gap * (SECTIONS.len() - 1) as f32;
    let section_height = PANEL_HEIGHT - 80.0;
    let top = 40.0;
    let total_columns: usize = SECTIONS.iter().map(|section| section.columns).sum();
    let column_width = usable_width / total_columns as f32;

    let mut sections = Vec::with_capacity(SECTIONS.len());
    let mut knobs = Vec::with_capacity(KNOB_COUNT);
    let mut x = margin;
    for section in &SECTIONS {
        let rect = Rect::new(x, top, column_width * section.columns as f32, section_height);
        for &(id, column, row) in section.knobs {
            let cell_x = rect.x + column as f32 * column_width;
            knobs.push((
                id,
                Rect::new(
                    cell_x + (column_width - KNOB_SIZE) * 0.5,
                    rect.y + 22.0 + row as f32 * KNOB_ROW_HEIGHT,
                    KNOB_SIZE,
                    KNOB_SIZE,
                ),
            ));
        }
        sections.push((rect, section.label));
        x += rect.w + gap;
    }
    PanelLayout { sections, knobs }
}

/// Normalised knob positions; a moved knob is mapped onto the panel once per frame.
struct KnobBoard {
    values: [f32; KNOB_COUNT],
    changed: Vec<KnobId>,
}

impl KnobBoard {
    fn new(config: &SynthConfig) -> Self {
        let mut board = Self {
            values: [0.5; KNOB_COUNT],
            changed: Vec::new(),
        };
        board.values[KnobId::Osc1Wave as usize] = 0.25;
        board.values[KnobId::Osc2Wave as usize] = 0.25;
        board.values[KnobId::Wave as usize] = 0.25;
        board.values[KnobId::Osc1Fm as usize] = 0.2;
        board.values[KnobId::Osc2Fm as usize] = 0.2;
        board.values[KnobId::LfoAmount as usize] = 0.5;
        board.values[KnobId::LfoDest as usize] = 0.0;
        board.values[KnobId::FilterSustain as usize] = 0.0;
        board.values[KnobId::Sustain as usize] = 0.8;
        board.values[KnobId::Volume as usize] = 0.4;
        board.values[KnobId::Gain as usize] = (config.audio.gain / MAX_KNOB_GAIN).clamp(0.0, 1.0);
        board.values[KnobId::Voices as usize] = f32::from(config.voices() - 1) / 15.0;
        board
    }

    fn value(&self, id: KnobId) -> f32 {
        self.values[id as usize]
    }

    fn value_mut(&mut self, id: KnobId) -> &mut f32 {
        &mut self.values[id as usize]
    }

    fn mark_changed(&mut self, id: KnobId) {
        if !self.changed.contains(&id) {
            self.changed.push(id);
        }
    }

    fn take_changed(&mut self) -> Vec<KnobId> {
        std::mem::take(&mut self.changed)
    }

    fn apply_all(&self, panel: &mut ParamPanel, gain: &GainParam) {
        for section in &SECTIONS {
            for &(id, _, _) in section.knobs {
                if id != KnobId::Wave {
                    self.apply(id, panel, gain);
                }
            }
        }
    }

    fn apply(&self, id: KnobId, panel: &mut ParamPanel, gain: &GainParam) {
        let value = self.value(id);
        match id {
            KnobId::Osc1Wave | KnobId::Osc2Wave => panel.set_osc_wave(id.osc(), wave_code(value)),
            KnobId::Osc1Detune | KnobId::Osc2Detune => {
                panel.set_osc_detune(id.osc(), (value * 2.0 - 1.0) * DETUNE_RANGE)
            }
            KnobId::Osc1Gain | KnobId::Osc2Gain => panel.set_osc_gain(id.osc(), value),
            KnobId::Osc1Fm | KnobId::Osc2Fm => {
                let mut fm = panel.osc(id.osc()).fm;
                fm.index = value * MAX_FM_INDEX;
                panel.set_fm(id.osc(), fm);
            }
            KnobId::Wave => panel.set_wave(wave_code(value)),
            KnobId::Cutoff => {
                panel.set_cutoff(FILTER_MIN_HZ * (FILTER_MAX_HZ / FILTER_MIN_HZ).powf(value))
            }
            KnobId::Resonance => panel.set_resonance(value),
            KnobId::FilterAmount => panel.set_filter_amount(value * MAX_FILTER_AMOUNT),
            KnobId::FilterAttack
            | KnobId::FilterDecay
            | KnobId::FilterSustain
            | KnobId::FilterRelease => {
                let mut env = panel.filter_env();
                match id {
                    KnobId::FilterAttack => env.attack = env_seconds(value),
                    KnobId::FilterDecay => env.decay = env_seconds(value),
                    KnobId::FilterSustain => env.sustain = value,
                    _ => env.release = env_seconds(value),
                }
                panel.set_filter_env(env);
            }
            KnobId::Attack | KnobId::Decay | KnobId::Sustain | KnobId::Release => {
                let mut env = panel.env();
                match id {
                    KnobId::Attack => env.attack = env_seconds(value),
                    KnobId::Decay => env.decay = env_seconds(value),
                    KnobId::Sustain => env.sustain = value,
                    _ => env.release = env_seconds(value),
                }
                panel.set_env(env);
            }
            KnobId::LfoRate => panel.set_lfo_rate(0.05 + value * value * MAX_LFO_HZ),
            KnobId::LfoAmount => {
                let range = panel.lfo_dest().amount_range();
                panel.set_lfo_amount((value * 2.0 - 1.0) * range);
            }
            KnobId::LfoDest => {
                let code = (value * 7.0).round() as u8;
                if let Some(dest) = LfoDestination::from_code(code) {
                    panel.set_lfo_dest(dest);
                }
            }
            KnobId::Volume => panel.set_amp(value),
            KnobId::Gain => gain.set(value * MAX_KNOB_GAIN),
            KnobId::Voices => panel.set_voices(1 + (value * 15.0).round() as u8),
        }
    }
}

fn wave_code(value: f32) -> i32 {
    (value * WAVE_FM as f32).round() as i32
}

fn env_seconds(value: f32) -> f32 {
    0.001 + value * value * MAX_ENV_SEC
}

fn knob_display(id: KnobId, panel: &ParamPanel, gain: f32) -> String {
    let osc = panel.osc(id.osc());
    match id {
        KnobId::Osc1Wave | KnobId::Osc2Wave => wave_name(osc.wave).to_string(),
        KnobId::Wave => wave_name(panel.wave()).to_string(),
        KnobId::Osc1Detune | KnobId::Osc2Detune => format!("{:+.2} st", osc.detune),
        KnobId::Osc1Gain | KnobId::Osc2Gain => format!("{:.2}", osc.gain),
        KnobId::Osc1Fm | KnobId::Osc2Fm => format!("{:.1}", osc.fm.index),
        KnobId::Cutoff => format!("{:.0} Hz", panel.cutoff()),
        KnobId::Resonance => format!("{:.2}", panel.resonance()),
        KnobId::FilterAmount => format!("{:.0} Hz", panel.filter_amount()),
        KnobId::FilterAttack => format!("{:.3} s", panel.filter_env().attack),
        KnobId::FilterDecay => format!("{:.3} s", panel.filter_env().decay),
        KnobId::FilterSustain => format!("{:.2}", panel.filter_env().sustain),
        KnobId::FilterRelease => format!("{:.3} s", panel.filter_env().release),
        KnobId::Attack => format!("{:.3} s", panel.env().attack),
        KnobId::Decay => format!("{:.3} s", panel.env().decay),
        KnobId::Sustain => format!("{:.2}", panel.env().sustain),
        KnobId::Release => format!("{:.3} s", panel.env().release),
        KnobId::LfoRate => format!("{:.2} Hz", panel.lfo_rate()),
        KnobId::LfoAmount => format!("{:+.2}", panel.lfo_amount()),
        KnobId::LfoDest => panel.lfo_dest().label().to_string(),
        KnobId::Volume => format!("{:.2}", panel.amp()),
        KnobId::Gain => format!("{gain:.2}x"),
        KnobId::Voices if panel.voices_pinned() => "1 (MONO)".to_string(),
        KnobId::Voices => panel.voices().to_string(),
    }
}

fn wave_name(code: i32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| WAVE_NAMES.get(index))
        .copied()
        .unwrap_or("?")
}

#[derive(Default)]
struct KnobDragState {
    active_knob: Option<KnobId>,
    origin_value: f32,
    origin_y: f32,
}

fn mouse_position_vec() -> Vec2 {
    let (x, y) = mouse_position();
    vec2(x, y)
}

fn draw_scene(
    knobs: &mut KnobBoard,
    knob_drag: &mut KnobDragState,
    layout: &PanelLayout,
    keyboard_layout: &KeyboardLayout,
    channel: &ControlChannel,
    monitor: &TelemetryMonitor,
) {
    clear_background(BACKGROUND);

    for (rect, label) in &layout.sections {
        draw_section(rect, label);
    }
    for &(id, rect) in &layout.knobs {
        let display = knob_display(id, channel.panel(), knobs.value(id) * MAX_KNOB_GAIN);
        if draw_knob_widget(knob_drag, id, rect, knobs.value_mut(id), id.label(), &display) {
            knobs.mark_changed(id);
        }
    }
    draw_sub_labels(layout);
    draw_keyboard(channel.keyboard(), keyboard_layout);
    draw_engine_status(channel, monitor);
}

fn draw_section(rect: &Rect, label: &str) {
    draw_rectangle(
        rect.x,
        rect.y,
        rect.w,
        rect.h,
        Color::new(0.05, 0.03, 0.02, 0.65),
    );
    draw_rectangle_lines(rect.x, rect.y, rect.w, rect.h, 1.0, AMBER);
    draw_text_ex(
        label,
        rect.x + 6.0,
        rect.y - 6.0,
        TextParams {
            font_size: 18,
            color: AMBER,
            ..Default::default()
        },
    );
}

fn draw_sub_labels(layout: &PanelLayout) {
    let rows = [
        (KnobId::Osc1Wave, "OSC 1"),
        (KnobId::Osc2Wave, "OSC 2"),
        (KnobId::Wave, "ALL WAVES"),
    ];
    for (id, text) in rows {
        if let Some((_, rect)) = layout.knobs.iter().find(|(knob, _)| *knob == id) {
            draw_text_ex(
                text,
                rect.x + rect.w + 8.0,
                rect.y + rect.h + 24.0,
                TextParams {
                    font_size: 12,
                    color: AMBER_DIM,
                    ..Default::default()
                },
            );
        }
    }
}

fn draw_engine_status(channel: &ControlChannel, monitor: &TelemetryMonitor) {
    let engine = match (monitor.failure(), monitor.sample_rate()) {
        (Some(msg), _) => format!("ENGINE FAILED: {msg}"),
        (None, Some(sr)) => format!("ENGINE READY {sr} Hz"),
        (None, None) => "LOADING ENGINE...".to_string(),
    };
    let keyboard = channel.keyboard();
    let note = keyboard
        .current()
        .map_or_else(|| "--".to_string(), |midi| midi.to_string());
    let level = monitor
        .last_metrics()
        .map_or_else(String::new, |(frames, rms)| format!("  RMS {rms:.3} / {frames}"));
    let (commands, events) = (monitor.dropped_commands(), monitor.dropped_events());
    let drops = if commands + events > 0 {
        format!("  DROPPED {commands} CMD / {events} EVT")
    } else {
        String::new()
    };
    draw_status_line(
        &format!(
            "{engine}  {}  OCT {:+}  NOTE {note}{level}{drops}",
            keyboard.mode().label(),
            keyboard.octave_shift()
        ),
        0,
    );
    if let Some(line) = monitor.last_line() {
        draw_status_line(line, 2);
    }
}

fn draw_status_line(text: &str, row: usize) {
    draw_text_ex(
        text,
        40.0,
        PANEL_HEIGHT + 4.0 + row as f32 * 18.0,
        TextParams {
            font_size: 16,
            color: AMBER,
            ..Default::default()
        },
    );
}

fn draw_knob_widget(
    knob_drag: &mut KnobDragState,
    knob_id: KnobId,
    rect: Rect,
    value: &mut f32,
    label: &str,
    display: &str,
) -> bool {
    let before = *value;
    handle_knob_drag(knob_drag, knob_id, rect, value);
    let center = vec2(rect.x + rect.w * 0.5, rect.y + rect.h * 0.5);
    let radius = rect.w.min(rect.h) * 0.35;
    draw_circle(
        center.x,
        center.y,
        radius + 6.0,
        Color::new(0.05, 0.03, 0.02, 1.0),
    );
    draw_circle(
        center.x,
        center.y,
        radius,
        Color::new(0.12, 0.12, 0.12, 1.0),
    );
    draw_circle(
        center.x,
        center.y,
        radius * 0.65,
        Color::new(0.2, 0.2, 0.2, 1.0),
    );
    draw_circle_lines(center.x, center.y, radius + 6.0, 1.0, AMBER_DIM);
    let start_angle = -150.0f32.to_radians();
    let angle_range = 300.0f32.to_radians();
    let theta = start_angle + value.clamp(0.0, 1.0) * angle_range;
    let pointer = vec2(theta.cos(), theta.sin()) * radius * 0.8;
    draw_line(
        center.x,
        center.y,
        center.x + pointer.x,
        center.y + pointer.y,
        3.0,
        AMBER,
    );
    draw_centered_text(display, Rect::new(rect.x, rect.y - 10.0, rect.w, 16.0), 13);
    draw_centered_text(
        label,
        Rect::new(rect.x, rect.y + rect.h + 2.0, rect.w, 16.0),
        14,
    );
    (*value - before).abs() > f32::EPSILON
}

fn handle_knob_drag(knob_drag: &mut KnobDragState, knob_id: KnobId, rect: Rect, value: &mut f32) {
    let mouse = mouse_position_vec();
    if is_mouse_button_pressed(MouseButton::Left) && rect.contains(mouse) {
        knob_drag.active_knob = Some(knob_id);
        knob_drag.origin_value = *value;
        knob_drag.origin_y = mouse.y;
    }
    if knob_drag.active_knob == Some(knob_id) {
        if is_mouse_button_down(MouseButton::Left) {
            let delta = (knob_drag.origin_y - mouse.y) * 0.005;
            *value = (knob_drag.origin_value + delta).clamp(0.0, 1.0);
        } else {
            knob_drag.active_knob = None;
        }
    }
    if is_mouse_button_released(MouseButton::Left) && knob_drag.active_knob == Some(knob_id) {
        knob_drag.active_knob = None;
    }
    let (_x, wheel) = mouse_wheel();
    if rect.contains(mouse) && wheel.abs() > f32::EPSILON {
        *value = (*value + wheel * 0.03).clamp(0.0, 1.0);
    }
}

struct KeyVisual {
    rect: Rect,
    keycode: KeyCode,
    label: &'static str,
}

struct KeyboardLayout {
    white: Vec<KeyVisual>,
    black: Vec<KeyVisual>,
}

impl KeyboardLayout {
    fn hit_test(&self, point: Vec2) -> Option<KeyCode> {
        self.black
            .iter()
            .chain(self.white.iter())
            .find(|key| key.rect.contains(point))
            .map(|key| key.keycode)
    }
}

fn build_keyboard_layout(controller: &KeyboardController) -> KeyboardLayout {
    let area = Rect::new(
        40.0,
        PANEL_HEIGHT + 60.0,
        SCREEN_WIDTH - 80.0,
        SCREEN_HEIGHT - PANEL_HEIGHT - 100.0,
    );
    let spacing = 18.0;
    let white_count = controller.white_keys().len() as f32;
    let max_size_width = (area.w - spacing * (white_count - 1.0)) / white_count;
    let max_size_height = (area.h - spacing * 3.0) / 2.0;
    let key_size = max_size_width.min(max_size_height).max(40.0);
    let total_width = white_count * key_size + (white_count - 1.0) * spacing;
    let start_x = area.x + (area.w - total_width) * 0.5;
    let white_y = area.y + area.h - key_size;
    let black_y = white_y - key_size - spacing * 0.7;

    let white = controller
        .white_keys()
        .iter()
        .enumerate()
        .map(|(index, binding)| KeyVisual {
            rect: Rect::new(
                start_x + index as f32 * (key_size + spacing),
                white_y,
                key_size,
                key_size,
            ),
            keycode: binding.keycode,
            label: binding.label,
        })
        .collect();

    let mut black = Vec::new();
    for binding in controller.black_keys() {
        let center = start_x + binding.position_hint * total_width;
        let rect = Rect::new(center - key_size * 0.5, black_y, key_size, key_size);
        if rect.x + rect.w >= area.x && rect.x <= area.x + area.w {
            black.push(KeyVisual {
                rect,
                keycode: binding.keycode,
                label: binding.label,
            });
        }
    }

    KeyboardLayout { white, black }
}

fn draw_keyboard(controller: &KeyboardController, layout: &KeyboardLayout) {
    for key in &layout.white {
        let active = controller.is_pressed(key.keycode);
        draw_key(key.rect, active, false, key.label);
    }
    for key in &layout.black {
        let active = controller.is_pressed(key.keycode);
        draw_key(key.rect, active, true, key.label);
    }
}

fn draw_key(rect: Rect, active: bool, filled: bool, label: &str) {
    let fill_color = if active {
        Color::new(0.3, 0.2, 0.07, 0.9)
    } else if filled {
        Color::new(0.08, 0.05, 0.03, 0.95)
    } else {
        Color::new(0.02, 0.02, 0.02, 0.95)
    };
    draw_rounded_rect(rect, 10.0, fill_color);
    draw_rounded_rect_lines(rect, 10.0, AMBER);
    draw_centered_text(label, rect, KEY_FONT_SIZE);
}

fn draw_rounded_rect(rect: Rect, radius: f32, color: Color) {
    draw_rectangle(
        rect.x + radius,
        rect.y,
        rect.w - 2.0 * radius,
        rect.h,
        color,
    );
    draw_rectangle(
        rect.x,
        rect.y + radius,
        rect.w,
        rect.h - 2.0 * radius,
        color,
    );
    for (cx, cy) in [
        (rect.x + radius, rect.y + radius),
        (rect.x + rect.w - radius, rect.y + radius),
        (rect.x + radius, rect.y + rect.h - radius),
        (rect.x + rect.w - radius, rect.y + rect.h - radius),
    ] {
        draw_circle(cx, cy, radius, color);
    }
}

fn draw_rounded_rect_lines(rect: Rect, radius: f32, color: Color) {
    use std::f32::consts::PI;

    let left_x = rect.x + radius;
    let right_x = rect.x + rect.w - radius;
    let top_y = rect.y + radius;
    let bottom_y = rect.y + rect.h - radius;

    draw_line(left_x, rect.y, right_x, rect.y, 1.0, color);
    draw_line(left_x, rect.y + rect.h, right_x, rect.y + rect.h, 1.0, color);
    draw_line(rect.x, top_y, rect.x, bottom_y, 1.0, color);
    draw_line(rect.x + rect.w, top_y, rect.x + rect.w, bottom_y, 1.0, color);

    draw_corner_arc(vec2(left_x, top_y), PI, 1.5 * PI, radius, color);
    draw_corner_arc(vec2(right_x, top_y), 1.5 * PI, 0.0, radius, color);
    draw_corner_arc(vec2(right_x, bottom_y), 0.0, 0.5 * PI, radius, color);
    draw_corner_arc(vec2(left_x, bottom_y), 0.5 * PI, PI, radius, color);
}

fn draw_corner_arc(center: Vec2, start: f32, end: f32, radius: f32, color: Color) {
    let tau = std::f32::consts::TAU;
    let start = start.rem_euclid(tau);
    let mut sweep = end.rem_euclid(tau) - start;
    if sweep <= 0.0 {
        sweep += tau;
    }
    let steps = 10;
    let mut prev = center + vec2(start.cos(), start.sin()) * radius;
    for idx in 1..=steps {
        let angle = start + sweep * (idx as f32 / steps as f32);
        let next = center + vec2(angle.cos(), angle.sin()) * radius;
        draw_line(prev.x, prev.y, next.x, next.y, 1.0, color);
        prev = next;
    }
}

fn draw_centered_text(text: &str, rect: Rect, size: u16) {
    let measure = measure_text(text, None, size, 1.0);
    let x = rect.x + rect.w * 0.5 - measure.width * 0.5;
    let y = rect.y + rect.h * 0.5 + measure.height * 0.5;
    draw_text_ex(
        text,
        x,
        y,
        TextParams {
            font_size: size,
            color: AMBER,
            ..Default::default()
        },
    );
}
