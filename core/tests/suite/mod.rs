mod fresh_boot;
mod modules;
mod upgrade;
