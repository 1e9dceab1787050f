#![allow(dead_code)]

use calmform::form::FormFields;

#[derive(FormFields)]
struct Coordinates(f64, f64);

fn main() {}
