use reprise_core::prelude::*;
use reprise_devtools::Inspector;

#[derive(Clone, Debug, PartialEq)]
struct Item {
    id: u32,
    label: String,
    done: bool,
}

fn item(id: u32, label: &str, done: bool) -> Item {
    Item {
        id,
        label: label.to_string(),
        done,
    }
}

fn todo_item() -> Component<Item, Item> {
    create_component(
        |it: &Item| {
            let label = it.label.clone();
            use_effect_once(move || {
                log::info!("mounted `{label}`");
                on_unmount(move || log::info!("unmounted `{label}`"))
            })?;
            let (label, done) = (it.label.clone(), it.done);
            use_effect_with(done, move || log::info!("`{label}` done={done}"))?;
            Ok(it.clone())
        },
        |it: &Item, out: &mut Patcher<'_>| {
            let class = if it.done { "done" } else { "open" };
            out.element_open_with("li", None, &[("class", class)]);
            out.text(&it.label);
            out.element_close();
            Ok(())
        },
    )
    .named("TodoItem")
}

fn todo_list() -> Component<Vec<Item>, (Vec<Item>, usize)> {
    let row = todo_item();
    create_component(
        |items: &Vec<Item>| {
            let open = items.iter().filter(|it| !it.done).count();
            Ok((items.clone(), open))
        },
        move |(items, open): &(Vec<Item>, usize), out: &mut Patcher<'_>| {
            out.element_open("section", None);
            out.element_open("ul", None);
            for it in items {
                out.component(&row, it.id.to_string(), it.clone())?;
            }
            out.element_close();
            out.element_open("footer", None);
            out.text(&format!("{open} open"));
            out.element_close();
            out.element_close();
            Ok(())
        },
    )
    .named("TodoList")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let list = todo_list();
    let mut rt = Runtime::new();
    let root = rt.tree_mut().create_element("section");
    let mut inspector = Inspector::new();
    inspector.hud.toggle();

    let passes = [
        vec![
            item(1, "write", false),
            item(2, "test", false),
            item(3, "ship", false),
        ],
        vec![
            item(1, "write", true),
            item(2, "test", false),
            item(3, "ship", false),
        ],
        vec![
            item(3, "ship", false),
            item(1, "write", true),
            item(2, "test", false),
        ],
        vec![item(3, "ship", false), item(2, "test", true)],
    ];
    for items in passes {
        inspector.time_pass(&mut rt, |rt| rt.render(root, &list, items))?;
        println!("{}", rt.tree().outer_html(root));
        print!("{}", inspector.dump_tree(&rt, root));
    }

    rt.unmount(root);
    println!("{}", inspector.hud.summary());
    println!("after unmount: {}", rt.tree().outer_html(root));
    Ok(())
}
