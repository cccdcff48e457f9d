use std::marker::PhantomData;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct IdGenerator<T: From<usize>> {
    next_id: usize,
    phantom: PhantomData<T>,
}

impl<T: From<usize>> IdGenerator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next_id: usize) -> Self {
        IdGenerator {
            next_id,
            phantom: PhantomData,
        }
    }

    pub fn peek(&self) -> usize {
        self.next_id
    }

    pub fn gen(&mut self) -> T {
        let id = self.next_id;
        self.next_id += 1;
        T::from(id)
    }
}

impl<T: From<usize>> Default for IdGenerator<T> {
    fn default() -> IdGenerator<T> {
        IdGenerator {
            next_id: 0,
            phantom: PhantomData,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    prefix: &'static str,
    id: IdGenerator<usize>,
}

impl NameGenerator {
    pub fn new(prefix: &'static str) -> Self {
        NameGenerator {
            prefix,
            id: IdGenerator::new(),
        }
    }

    pub fn gen(&mut self) -> String {
        format!("{}{}", self.prefix, self.id.gen())
    }
}

pub trait IntoOnly {
    type Item;

    fn into_only(self) -> Result<Self::Item>;
}

impl<T> IntoOnly for Vec<T> {
    type Item = T;

    fn into_only(mut self) -> Result<T> {
        match self.len() {
            1 => Ok(self.remove(0)),
            0 => Err(anyhow!("Expected one element, but found none.")),
            _ => Err(anyhow!("Expected one element, but found more.")),
        }
    }
}
