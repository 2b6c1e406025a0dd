use console::Style;
use sae_loaders::LoaderRegistry;

pub fn handle_loaders() {
    let style_name = Style::new().bold();
    for name in LoaderRegistry::global().names() {
        println!("{}", style_name.apply_to(name));
    }
}
