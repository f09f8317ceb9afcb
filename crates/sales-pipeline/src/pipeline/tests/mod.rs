mod common;
mod replay;
mod routing;
