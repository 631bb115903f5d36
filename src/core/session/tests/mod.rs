mod conversations;
mod initialize;
mod support;
