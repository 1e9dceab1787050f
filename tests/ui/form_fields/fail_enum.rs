#![allow(dead_code)]

use calmform::form::FormFields;

#[derive(FormFields)]
enum Plan {
    Free,
    Paid { seats: u32 },
}

fn main() {}
