use super::codec::{ButtonSet, ControllerState, InputReport, InputState, MotionState};

/// Events that can be emitted by the DualShock 4 controller
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Button(ButtonEvent),
    Axis(AxisEvent),
    Trigger(TriggerEvent),
    Motion(MotionState),
    Battery(BatteryInput),
}

/// Binary input contain either pressed or unpressed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryInput {
    pub pressed: bool,
}

/// Button events represent binary inputs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonEvent {
    Square(BinaryInput),
    Cross(BinaryInput),
    Circle(BinaryInput),
    Triangle(BinaryInput),
    L1(BinaryInput),
    R1(BinaryInput),
    L2(BinaryInput),
    R2(BinaryInput),
    Share(BinaryInput),
    Options(BinaryInput),
    L3(BinaryInput),
    R3(BinaryInput),
    Guide(BinaryInput),
    PadPress(BinaryInput),
    DPadUp(BinaryInput),
    DPadRight(BinaryInput),
    DPadDown(BinaryInput),
    DPadLeft(BinaryInput),
}

/// Axis input contain (x, y) coordinates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisInput {
    pub x: u8,
    pub y: u8,
}

/// Touch contact on the touchpad
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TouchAxisInput {
    pub index: u8,
    pub tracking_id: u8,
    pub is_touching: bool,
    pub x: u16,
    pub y: u16,
}

/// Axis events are events that have (x, y) values
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AxisEvent {
    Pad(TouchAxisInput),
    LStick(AxisInput),
    RStick(AxisInput),
}

/// Trigger input contains non-negative integers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerInput {
    pub value: u8,
}

/// Trigger events contain positive values indicating how far a trigger is pulled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    L2(TriggerInput),
    R2(TriggerInput),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatteryInput {
    pub percent: u8,
    pub charging: bool,
}

/// Translate the difference between two consecutive reports into events.
/// Nothing is emitted for the first report.
pub fn translate(old: Option<&InputReport>, new: &InputReport) -> Vec<Event> {
    let mut events = Vec::new();
    let Some(old) = old else {
        return events;
    };
    let (Some(old_controller), Some(controller)) = (old.controller(), new.controller()) else {
        return events;
    };
    let mut controller = *controller;
    if let InputReport::Reduced(state) = new {
        if !state.has_r2_trigger {
            controller.r2_trigger = old_controller.r2_trigger;
        }
    }
    translate_controller(old_controller, &controller, &mut events);

    if let (InputReport::Full(old_state), InputReport::Full(state)) = (old, new) {
        translate_full(old_state, state, &mut events);
    }

    events
}

fn translate_buttons(old: &ButtonSet, new: &ButtonSet, events: &mut Vec<Event>) {
    let pairs: [(bool, bool, fn(BinaryInput) -> ButtonEvent); 14] = [
        (old.square, new.square, ButtonEvent::Square),
        (old.cross, new.cross, ButtonEvent::Cross),
        (old.circle, new.circle, ButtonEvent::Circle),
        (old.triangle, new.triangle, ButtonEvent::Triangle),
        (old.l1, new.l1, ButtonEvent::L1),
        (old.r1, new.r1, ButtonEvent::R1),
        (old.l2, new.l2, ButtonEvent::L2),
        (old.r2, new.r2, ButtonEvent::R2),
        (old.share, new.share, ButtonEvent::Share),
        (old.options, new.options, ButtonEvent::Options),
        (old.l3, new.l3, ButtonEvent::L3),
        (old.r3, new.r3, ButtonEvent::R3),
        (old.ps, new.ps, ButtonEvent::Guide),
        (old.touchpad, new.touchpad, ButtonEvent::PadPress),
    ];
    for (was, is, event) in pairs {
        if was != is {
            events.push(Event::Button(event(BinaryInput { pressed: is })));
        }
    }
}

fn translate_controller(old: &ControllerState, new: &ControllerState, events: &mut Vec<Event>) {
    translate_buttons(&old.buttons, &new.buttons, events);

    if old.dpad != new.dpad {
        let dpad_events: [fn(BinaryInput) -> ButtonEvent; 4] = [
            ButtonEvent::DPadUp,
            ButtonEvent::DPadRight,
            ButtonEvent::DPadDown,
            ButtonEvent::DPadLeft,
        ];
        let was = old.dpad.as_buttons();
        let is = new.dpad.as_buttons();
        for (i, event) in dpad_events.iter().enumerate() {
            if was[i] != is[i] {
                events.push(Event::Button(event(BinaryInput { pressed: is[i] })));
            }
        }
    }

    if old.left_stick != new.left_stick {
        events.push(Event::Axis(AxisEvent::LStick(AxisInput {
            x: new.left_stick.x,
            y: new.left_stick.y,
        })));
    }
    if old.right_stick != new.right_stick {
        events.push(Event::Axis(AxisEvent::RStick(AxisInput {
            x: new.right_stick.x,
            y: new.right_stick.y,
        })));
    }

    if old.l2_trigger != new.l2_trigger {
        events.push(Event::Trigger(TriggerEvent::L2(TriggerInput {
            value: new.l2_trigger,
        })));
    }
    if old.r2_trigger != new.r2_trigger {
        events.push(Event::Trigger(TriggerEvent::R2(TriggerInput {
            value: new.r2_trigger,
        })));
    }
}

fn translate_full(old: &InputState, new: &InputState, events: &mut Vec<Event>) {
    // Only the newest frame matters; older ones were superseded within the
    // same report.
    if let (Some(old_touch), Some(touch)) = (old.latest_touch(), new.latest_touch()) {
        for (index, (was, is)) in old_touch.points.iter().zip(touch.points.iter()).enumerate() {
            if was == is || (!was.active && !is.active) {
                continue;
            }
            events.push(Event::Axis(AxisEvent::Pad(TouchAxisInput {
                index: index as u8,
                tracking_id: is.tracking_id,
                is_touching: is.active,
                x: is.x,
                y: is.y,
            })));
        }
    }

    if old.imu != new.imu {
        events.push(Event::Motion(new.motion));
    }

    let was = (old.power.battery_percent(), old.power.cable_connected);
    let is = (new.power.battery_percent(), new.power.cable_connected);
    if was != is {
        events.push(Event::Battery(BatteryInput {
            percent: is.0,
            charging: is.1,
        }));
    }
}
