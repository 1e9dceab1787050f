#![allow(dead_code)]

use calmform::form::FormFields;

#[derive(FormFields)]
struct Wrapper<T> {
    value: T,
}

fn main() {}
